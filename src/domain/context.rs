//! Immutable context passed through a single deployment.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::future::UnitFuture;

use super::ids::{Region, ServerId, VariantName};

/// Callback receiving human-readable progress messages during a deployment.
///
/// Each call is awaited before the next deployment step starts.
pub type StatusUpdater = Arc<dyn Fn(String) -> UnitFuture<'static> + Send + Sync>;

/// Status updater that discards every message.
#[must_use]
pub fn silent_status_updater() -> StatusUpdater {
    Arc::new(|_message: String| -> UnitFuture<'static> { Box::pin(async {}) })
}

/// Everything a backend strategy needs to provision one server.
#[derive(Clone)]
pub struct DeploymentContext {
    server_id: ServerId,
    region: Region,
    variant: VariantName,
    status_updater: StatusUpdater,
    admin_identity: Option<String>,
    guild_id: Option<String>,
    extra_env: BTreeMap<String, String>,
}

impl DeploymentContext {
    /// Creates a context with no admin, tenant, or environment overrides.
    #[must_use]
    pub fn new(
        server_id: ServerId,
        region: Region,
        variant: VariantName,
        status_updater: StatusUpdater,
    ) -> Self {
        Self {
            server_id,
            region,
            variant,
            status_updater,
            admin_identity: None,
            guild_id: None,
            extra_env: BTreeMap::new(),
        }
    }

    /// Sets the identity granted admin rights on the server.
    #[must_use]
    pub fn with_admin_identity(mut self, identity: Option<String>) -> Self {
        self.admin_identity = identity;
        self
    }

    /// Sets the tenant the server belongs to.
    #[must_use]
    pub fn with_guild_id(mut self, guild_id: Option<String>) -> Self {
        self.guild_id = guild_id;
        self
    }

    /// Sets environment overrides applied after every other source.
    #[must_use]
    pub fn with_extra_env(mut self, extra_env: BTreeMap<String, String>) -> Self {
        self.extra_env = extra_env;
        self
    }

    /// Server being deployed.
    #[must_use]
    pub const fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    /// Target region.
    #[must_use]
    pub const fn region(&self) -> &Region {
        &self.region
    }

    /// Requested variant.
    #[must_use]
    pub const fn variant(&self) -> &VariantName {
        &self.variant
    }

    /// Identity granted admin rights, if any.
    #[must_use]
    pub fn admin_identity(&self) -> Option<&str> {
        self.admin_identity.as_deref()
    }

    /// Tenant identifier, if any.
    #[must_use]
    pub fn guild_id(&self) -> Option<&str> {
        self.guild_id.as_deref()
    }

    /// Environment overrides.
    #[must_use]
    pub const fn extra_env(&self) -> &BTreeMap<String, String> {
        &self.extra_env
    }

    /// First block of the server id, used to prefix the hostname.
    #[must_use]
    pub fn hostname_prefix(&self) -> &str {
        self.server_id.prefix()
    }

    /// Reports progress and waits for the callback to finish.
    pub async fn report(&self, message: impl Into<String>) {
        (self.status_updater)(message.into()).await;
    }
}

impl fmt::Debug for DeploymentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentContext")
            .field("server_id", &self.server_id)
            .field("region", &self.region)
            .field("variant", &self.variant)
            .field("admin_identity", &self.admin_identity)
            .field("guild_id", &self.guild_id)
            .field("extra_env", &self.extra_env.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
