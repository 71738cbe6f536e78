//! Server lifecycle use cases: create, delete, and delete-for-user.
//!
//! Rows move `pending → ready → terminating` and are then removed. The
//! one-active-server rule and the no-double-delete rule are enforced by
//! re-reading rows inside a store transaction before every mutation; no lock
//! is held across a backend call.
//!
//! A failed deployment leaves its row `pending` on purpose. The stuck-pending
//! reaper relies on that row to reclaim whatever the deployment left behind.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendError, DeploymentOrchestrator};
use crate::cancel::CancellationRegistry;
use crate::domain::{
    DeployedServer, DeploymentContext, PlayerIdentity, Region, Server, ServerId, ServerStatus,
    StatusUpdater, VariantName,
};
use crate::repository::{
    AuditEvent, AuditLog, BanRepository, BanStatus, CreditsRepository, FleetStore,
    RepositoryError, TenantRepository, UserRepository,
};
use crate::settle::{AggregateError, settle_all};

/// Failures caused by the requester; their messages are safe to show
/// verbatim.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum UserError {
    /// Raised when the requester never stored a game-account id.
    #[error(
        "Before creating a server, please set your game account id using the `/set-user-data` \
         command. This is required to give you admin access to the server."
    )]
    MissingIdentity,
    /// Raised when the stored game-account id cannot be understood.
    #[error("Your stored game account id '{input}' is not valid. Please set it again.")]
    InvalidIdentity {
        /// Stored text.
        input: String,
    },
    /// Raised when the requester is banned.
    #[error("You are banned and cannot create servers. Reason: {}", .reason.as_deref().unwrap_or("No reason provided"))]
    Banned {
        /// Moderator-supplied reason.
        reason: Option<String>,
    },
    /// Raised when credits are enabled and the balance is exhausted.
    #[error("You do not have enough credits to start a server.")]
    NotEnoughCredits,
    /// Raised when the requester already holds a pending or ready server.
    #[error("You already have a server running. Please terminate it before creating a new one.")]
    AlreadyHasServer,
    /// Raised when the server to delete does not exist.
    #[error("Server not found.")]
    NotFound,
}

/// Errors returned by the lifecycle use cases.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Requester-facing failure.
    #[error(transparent)]
    User(#[from] UserError),
    /// Deployment or teardown failure.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// Persistence failure.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    /// Raised when the row stopped being `pending` while the deployment ran,
    /// typically because a deletion started concurrently.
    #[error("server {server_id} left pending while it was being deployed")]
    Superseded {
        /// Server whose deployment result was discarded.
        server_id: ServerId,
    },
    /// Raised when some deletions of a batch failed.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

impl LifecycleError {
    /// Returns `true` when the backend reported the resources as missing.
    #[must_use]
    pub const fn is_backend_not_found(&self) -> bool {
        matches!(self, Self::Backend(err) if err.is_not_found())
    }

    /// Returns the requester-facing error, if this is one.
    #[must_use]
    pub const fn as_user_error(&self) -> Option<&UserError> {
        match self {
            Self::User(err) => Some(err),
            _ => None,
        }
    }
}

/// Why a server is being removed; selects the audit message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TerminationReason {
    /// Requested by the owner or an operator, or by the idle reaper.
    Requested,
    /// Ran past the maximum duration.
    MaxRuntime {
        /// Configured maximum, in hours.
        hours: u32,
    },
    /// Provisioning never finished.
    StuckPending {
        /// Configured grace period, in minutes.
        minutes: u32,
    },
    /// The owner ran out of credits.
    OutOfCredits,
}

impl TerminationReason {
    fn audit_message(self, server: &Server) -> String {
        let id = &server.server_id;
        match self {
            Self::Requested => format!("Server {id} deleted in region {}.", server.region),
            Self::MaxRuntime { hours } => {
                format!("Server {id} terminated for exceeding {hours} hours runtime.")
            }
            Self::StuckPending { minutes } => format!(
                "Server {id} terminated after being stuck in pending for over {minutes} minutes."
            ),
            Self::OutOfCredits => format!("Server {id} terminated due to lack of credits."),
        }
    }

    fn discard_message(self, server_id: &ServerId) -> String {
        match self {
            Self::StuckPending { minutes } => format!(
                "Server {server_id} record deleted after being stuck in pending for over {minutes} minutes."
            ),
            _ => format!("Server {server_id} record deleted; no cloud resources were found."),
        }
    }
}

/// Parameters of a create request.
#[derive(Clone)]
pub struct CreateServerRequest {
    /// Requesting user.
    pub user_id: String,
    /// Target region.
    pub region: Region,
    /// Requested variant.
    pub variant: VariantName,
    /// Tenant the request came from.
    pub guild_id: Option<String>,
    /// Receives deployment progress.
    pub status_updater: StatusUpdater,
}

impl std::fmt::Debug for CreateServerRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateServerRequest")
            .field("user_id", &self.user_id)
            .field("region", &self.region)
            .field("variant", &self.variant)
            .field("guild_id", &self.guild_id)
            .finish_non_exhaustive()
    }
}

/// Collaborators of [`ServerLifecycle`].
#[derive(Clone)]
pub struct LifecycleDeps {
    /// Server and activity rows.
    pub store: Arc<dyn FleetStore>,
    /// Backend dispatch.
    pub orchestrator: Arc<dyn DeploymentOrchestrator>,
    /// Per-server deployment cancellation.
    pub registry: Arc<CancellationRegistry>,
    /// Audit trail.
    pub audit: Arc<dyn AuditLog>,
    /// Credit balances.
    pub credits: Arc<dyn CreditsRepository>,
    /// Ban list.
    pub bans: Arc<dyn BanRepository>,
    /// User profiles.
    pub users: Arc<dyn UserRepository>,
    /// Tenant parameters.
    pub tenants: Arc<dyn TenantRepository>,
}

/// Create and delete use cases over injected collaborators.
#[derive(Clone)]
pub struct ServerLifecycle {
    deps: LifecycleDeps,
    credits_enabled: bool,
}

impl ServerLifecycle {
    /// Creates the use cases.
    #[must_use]
    pub const fn new(deps: LifecycleDeps, credits_enabled: bool) -> Self {
        Self {
            deps,
            credits_enabled,
        }
    }

    /// Collaborators the use cases run against.
    #[must_use]
    pub const fn deps(&self) -> &LifecycleDeps {
        &self.deps
    }

    /// Provisions a server for a user and returns the `ready` row.
    ///
    /// # Errors
    ///
    /// Returns [`UserError`] for missing identity, bans, exhausted credits,
    /// or an existing active server; backend and repository failures are
    /// propagated. A failed deployment leaves the row `pending`.
    pub async fn create_server_for_user(
        &self,
        request: CreateServerRequest,
    ) -> Result<Server, LifecycleError> {
        let identity = self.identity(&request.user_id).await?;
        self.ensure_not_banned(&identity, &request.user_id).await?;
        if self.credits_enabled {
            self.ensure_credits(&request.user_id).await?;
        }

        let server_id = ServerId::generate();
        let pending = Server::pending(
            server_id.clone(),
            request.region.clone(),
            request.variant.clone(),
            request.user_id.clone(),
            request.guild_id.clone(),
            Utc::now(),
        );
        self.reserve(&pending).await?;
        info!(
            server_id = %server_id,
            user_id = %request.user_id,
            region = %request.region,
            variant = %request.variant,
            "pending server recorded"
        );

        let extra_env = self.extra_environment(request.guild_id.as_deref()).await?;
        let context = DeploymentContext::new(
            server_id.clone(),
            request.region.clone(),
            request.variant.clone(),
            request.status_updater,
        )
        .with_admin_identity(Some(identity.to_string()))
        .with_guild_id(request.guild_id.clone())
        .with_extra_env(extra_env);

        let deployed = match self.deps.orchestrator.deploy(context).await {
            Ok(deployed) => deployed,
            Err(err) => {
                self.deps.registry.delete(&server_id);
                error!(server_id = %server_id, error = %err, "deployment failed; row left pending");
                return Err(err.into());
            }
        };

        let ready = self.promote(&server_id, deployed).await?;
        self.audit(AuditEvent::new(
            request.user_id.as_str(),
            Some(server_id.clone()),
            format!(
                "User created a server in region {} with variant {}",
                request.region, request.variant
            ),
        ))
        .await;
        info!(server_id = %server_id, "server ready");
        Ok(ready)
    }

    /// Deletes a server on behalf of its owner or an operator.
    ///
    /// # Errors
    ///
    /// Returns [`UserError::NotFound`] when the row is gone before deletion
    /// starts; backend failures propagate and leave the row `terminating`.
    pub async fn delete_server(&self, server_id: &ServerId) -> Result<(), LifecycleError> {
        self.terminate(server_id, TerminationReason::Requested)
            .await
    }

    /// Deletes a server and records `reason` in the audit trail.
    ///
    /// # Errors
    ///
    /// See [`ServerLifecycle::delete_server`].
    pub async fn terminate(
        &self,
        server_id: &ServerId,
        reason: TerminationReason,
    ) -> Result<(), LifecycleError> {
        let server = self.mark_terminating(server_id).await?;

        if let Err(err) = self
            .deps
            .orchestrator
            .delete(server_id, &server.region)
            .await
        {
            error!(server_id = %server_id, error = %err, "backend deletion failed; row left terminating");
            return Err(err.into());
        }

        let Some(removed) = self.remove_rows(server_id).await? else {
            info!(server_id = %server_id, "server already removed by another actor");
            return Ok(());
        };
        self.audit(AuditEvent::new(
            removed.created_by.as_str(),
            Some(server_id.clone()),
            reason.audit_message(&removed),
        ))
        .await;
        info!(server_id = %server_id, ?reason, "server deleted");
        Ok(())
    }

    /// Removes the rows of a server whose cloud resources no longer exist,
    /// without calling the backend.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn discard_record(
        &self,
        server_id: &ServerId,
        reason: TerminationReason,
    ) -> Result<(), LifecycleError> {
        let Some(removed) = self.remove_rows(server_id).await? else {
            return Ok(());
        };
        self.audit(AuditEvent::new(
            removed.created_by.as_str(),
            Some(server_id.clone()),
            reason.discard_message(server_id),
        ))
        .await;
        info!(server_id = %server_id, "server record discarded");
        Ok(())
    }

    /// Deletes every active server of `user_id`.
    ///
    /// All servers are marked `terminating` first, then each deletion runs
    /// independently. Returns the ids that were deleted.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Aggregate`] listing every failed deletion
    /// after all of them were attempted. Successful deletions stand.
    pub async fn delete_servers_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ServerId>, LifecycleError> {
        let mut tx = self.deps.store.begin().await?;
        let mut targets = Vec::new();
        let now = Utc::now();
        for server in tx.servers_by_owner(user_id).await? {
            if !server.status.is_active() {
                continue;
            }
            targets.push(server.server_id.clone());
            tx.upsert_server(&server.with_status(ServerStatus::Terminating, now))
                .await?;
        }
        tx.commit().await?;
        info!(user_id, count = targets.len(), "deleting servers for user");

        let settled = settle_all(targets.iter().map(|server_id| async move {
            self.delete_server(server_id)
                .await
                .map(|()| server_id.clone())
                .map_err(|err| format!("{server_id}: {err}"))
        }))
        .await;
        settled
            .into_result(&format!("deleting servers of {user_id}"))
            .map_err(LifecycleError::from)
    }

    async fn identity(&self, user_id: &str) -> Result<PlayerIdentity, LifecycleError> {
        let account = self
            .deps
            .users
            .account_id(user_id)
            .await?
            .filter(|text| !text.trim().is_empty())
            .ok_or(UserError::MissingIdentity)?;
        account
            .parse::<PlayerIdentity>()
            .map_err(|err| UserError::InvalidIdentity { input: err.input }.into())
    }

    async fn ensure_not_banned(
        &self,
        identity: &PlayerIdentity,
        user_id: &str,
    ) -> Result<(), LifecycleError> {
        match self.deps.bans.lookup(identity, user_id).await? {
            BanStatus::Clear => Ok(()),
            BanStatus::Banned { reason } => {
                warn!(user_id, identity = %identity, "banned user attempted to create a server");
                Err(UserError::Banned { reason }.into())
            }
        }
    }

    async fn ensure_credits(&self, user_id: &str) -> Result<(), LifecycleError> {
        let balance = self.deps.credits.balance(user_id).await?;
        if balance.is_some_and(|credits| credits > 0) {
            return Ok(());
        }
        self.audit(AuditEvent::new(
            user_id,
            None,
            "User tried to create a server but has no credits.",
        ))
        .await;
        Err(UserError::NotEnoughCredits.into())
    }

    async fn reserve(&self, pending: &Server) -> Result<(), LifecycleError> {
        let mut tx = self.deps.store.begin().await?;
        let owned = tx.servers_by_owner(&pending.created_by).await?;
        if owned.iter().any(|server| server.status.is_active()) {
            return Err(UserError::AlreadyHasServer.into());
        }
        tx.upsert_server(pending).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn extra_environment(
        &self,
        guild_id: Option<&str>,
    ) -> Result<BTreeMap<String, String>, LifecycleError> {
        let Some(guild) = guild_id else {
            return Ok(BTreeMap::new());
        };
        Ok(self.deps.tenants.extra_environment(guild).await?)
    }

    async fn promote(
        &self,
        server_id: &ServerId,
        deployed: DeployedServer,
    ) -> Result<Server, LifecycleError> {
        let mut tx = self.deps.store.begin().await?;
        let current = tx.find_server(server_id).await?;
        let Some(row) = current.filter(|row| row.status.can_transition_to(ServerStatus::Ready))
        else {
            drop(tx);
            warn!(server_id = %server_id, "row no longer pending; discarding deployment");
            self.release_superseded(server_id, &deployed.region).await;
            return Err(LifecycleError::Superseded {
                server_id: server_id.clone(),
            });
        };
        let ready = row.into_ready(deployed, Utc::now());
        tx.upsert_server(&ready).await?;
        tx.commit().await?;
        Ok(ready)
    }

    async fn release_superseded(&self, server_id: &ServerId, region: &Region) {
        if let Err(err) = self.deps.orchestrator.delete(server_id, region).await {
            warn!(server_id = %server_id, error = %err, "failed to release superseded deployment");
        }
    }

    async fn mark_terminating(&self, server_id: &ServerId) -> Result<Server, LifecycleError> {
        let mut tx = self.deps.store.begin().await?;
        let server = tx.find_server(server_id).await?.ok_or(UserError::NotFound)?;
        let terminating = server.with_status(ServerStatus::Terminating, Utc::now());
        tx.upsert_server(&terminating).await?;
        tx.commit().await?;
        Ok(terminating)
    }

    async fn remove_rows(&self, server_id: &ServerId) -> Result<Option<Server>, LifecycleError> {
        let mut tx = self.deps.store.begin().await?;
        let Some(server) = tx.find_server(server_id).await? else {
            return Ok(None);
        };
        tx.delete_server(server_id).await?;
        tx.delete_activity(server_id).await?;
        tx.commit().await?;
        if !self.deps.registry.cancel(server_id) {
            debug!(server_id = %server_id, "no deployment in flight");
        }
        Ok(Some(server))
    }

    async fn audit(&self, event: AuditEvent) {
        if let Err(err) = self.deps.audit.record(event).await {
            warn!(error = %err, "failed to record audit event");
        }
    }
}

impl std::fmt::Debug for ServerLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerLifecycle")
            .field("credits_enabled", &self.credits_enabled)
            .finish_non_exhaustive()
    }
}
