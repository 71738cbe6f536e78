//! Strategy for managed single-container instances.
//!
//! The provider runs the game image directly: a firewall group scoped to
//! the server id is created first, then the instance, whose network
//! attachment, public address, and active state are awaited in turn before
//! the game itself is probed.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::{DeployedServer, DeploymentContext, Region, ServerId};
use crate::environment::build_environment;
use crate::future::BoxFuture;
use crate::poll::{PollOptions, wait_until};

use super::firewall::FirewallService;
use super::{BackendError, DeploymentOrchestrator, DeploymentToolkit, tolerate_missing};

/// Lifecycle state reported for a container instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InstanceState {
    /// Still being created or booted.
    Provisioning,
    /// Running and serving.
    Active,
    /// Being torn down.
    Deleting,
    /// Any other provider-specific state.
    Other(String),
}

/// Point-in-time view of a container instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceSnapshot {
    /// Provider identifier.
    pub id: String,
    /// Current state.
    pub state: InstanceState,
    /// Identifier of the public network attachment once assigned.
    pub attachment: Option<String>,
}

/// Everything needed to launch a container instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceLaunch {
    /// Server the instance belongs to; used as its display name.
    pub server_id: ServerId,
    /// Target region.
    pub region: Region,
    /// Container image.
    pub image: String,
    /// Compute shape.
    pub shape: String,
    /// Virtual CPUs.
    pub ocpu: u32,
    /// Memory in gigabytes.
    pub memory_gb: u32,
    /// Firewall group protecting the instance.
    pub firewall_group: String,
    /// Container environment.
    pub environment: BTreeMap<String, String>,
}

/// Provider client managing container instances.
pub trait InstanceService: Send + Sync {
    /// Launches an instance and returns its identifier.
    fn launch<'a>(&'a self, launch: &'a InstanceLaunch) -> BoxFuture<'a, String, BackendError>;

    /// Describes an instance; [`BackendError::NotFound`] once it is gone.
    fn describe<'a>(
        &'a self,
        instance_id: &'a str,
        region: &'a Region,
    ) -> BoxFuture<'a, InstanceSnapshot, BackendError>;

    /// Resolves the public address behind a network attachment.
    fn public_ip<'a>(
        &'a self,
        attachment: &'a str,
        region: &'a Region,
    ) -> BoxFuture<'a, String, BackendError>;

    /// Finds the instance named after `server_id`.
    fn find<'a>(
        &'a self,
        server_id: &'a ServerId,
        region: &'a Region,
    ) -> BoxFuture<'a, String, BackendError>;

    /// Requests deletion of an instance.
    fn delete<'a>(
        &'a self,
        instance_id: &'a str,
        region: &'a Region,
    ) -> BoxFuture<'a, (), BackendError>;
}

/// [`DeploymentOrchestrator`] over a managed container-instance service.
#[derive(Clone)]
pub struct ContainerInstanceBackend {
    toolkit: DeploymentToolkit,
    firewall: Arc<dyn FirewallService>,
    instances: Arc<dyn InstanceService>,
}

impl ContainerInstanceBackend {
    /// Creates the strategy.
    #[must_use]
    pub fn new(
        toolkit: DeploymentToolkit,
        firewall: Arc<dyn FirewallService>,
        instances: Arc<dyn InstanceService>,
    ) -> Self {
        Self {
            toolkit,
            firewall,
            instances,
        }
    }

    async fn run_deployment(
        &self,
        context: &DeploymentContext,
    ) -> Result<DeployedServer, BackendError> {
        let server_id = context.server_id();
        let region = context.region();
        let timings = self.toolkit.timings;
        let token = self.toolkit.token(server_id);

        let credentials = self.toolkit.credentials.generate();
        let variant = self
            .toolkit
            .catalog
            .variant_for(context.variant(), context.guild_id())?;
        let region_config = self.toolkit.catalog.region(region)?;
        let environment = build_environment(context, &credentials, &variant, region_config);

        context.report("[1/5] Creating firewall...").await;
        let firewall_group = self.firewall.create(server_id, region).await?;

        context.report("[2/5] Creating server instance...").await;
        let launch = InstanceLaunch {
            server_id: server_id.clone(),
            region: region.clone(),
            image: variant.image.clone(),
            shape: variant.shape.clone(),
            ocpu: variant.ocpu,
            memory_gb: variant.memory_gb,
            firewall_group,
            environment,
        };
        let instance_id = self.instances.launch(&launch).await?;
        info!(server_id = %server_id, instance_id = %instance_id, "container instance launched");

        context
            .report("[3/5] Waiting for network interfaces...")
            .await;
        let attachment = self
            .toolkit
            .poll(&token, "network attachment", timings.network, || {
                self.attachment(&instance_id, region)
            })
            .await?;
        let public_ip = self.instances.public_ip(&attachment, region).await?;

        context
            .report("[4/5] Waiting for server instance to become active...")
            .await;
        self.toolkit
            .poll(&token, "active instance", timings.activation, || {
                self.active(&instance_id, region)
            })
            .await?;

        context
            .report("[5/5] Waiting for game server to accept console commands...")
            .await;
        let endpoint = self
            .toolkit
            .wait_for_game(&public_ip, &credentials, server_id, &token)
            .await?;

        Ok(self
            .toolkit
            .finish(context, &public_ip, endpoint, credentials))
    }

    async fn attachment(&self, instance_id: &str, region: &Region) -> Result<String, BackendError> {
        let snapshot = self.instances.describe(instance_id, region).await?;
        snapshot.attachment.ok_or_else(|| BackendError::NotReady {
            resource: format!("instance {instance_id}"),
            detail: String::from("network attachment not assigned yet"),
        })
    }

    async fn active(&self, instance_id: &str, region: &Region) -> Result<(), BackendError> {
        let snapshot = self.instances.describe(instance_id, region).await?;
        if snapshot.state == InstanceState::Active {
            return Ok(());
        }
        Err(BackendError::NotReady {
            resource: format!("instance {instance_id}"),
            detail: format!("state is {:?}", snapshot.state),
        })
    }

    async fn gone(&self, instance_id: &str, region: &Region) -> Result<(), BackendError> {
        match self.instances.describe(instance_id, region).await {
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
            Ok(snapshot) => Err(BackendError::NotReady {
                resource: format!("instance {instance_id}"),
                detail: format!("still present in state {:?}", snapshot.state),
            }),
        }
    }

    async fn delete_instance(
        &self,
        server_id: &ServerId,
        region: &Region,
    ) -> Result<(), BackendError> {
        let instance_id = self.instances.find(server_id, region).await?;
        self.instances.delete(&instance_id, region).await?;

        let (interval, timeout) = self.toolkit.timings.teardown;
        let options = PollOptions::new(interval, timeout);
        wait_until(|| self.gone(&instance_id, region), &options)
            .await
            .map_err(|err| BackendError::from_wait("instance teardown", err))
    }
}

impl DeploymentOrchestrator for ContainerInstanceBackend {
    fn deploy(&self, context: DeploymentContext) -> BoxFuture<'_, DeployedServer, BackendError> {
        Box::pin(async move {
            info!(
                server_id = %context.server_id(),
                region = %context.region(),
                variant = %context.variant(),
                "starting container-instance deployment"
            );
            self.run_deployment(&context).await.inspect_err(|err| {
                warn!(server_id = %context.server_id(), error = %err, "deployment failed");
            })
        })
    }

    fn delete<'a>(
        &'a self,
        server_id: &'a ServerId,
        region: &'a Region,
    ) -> BoxFuture<'a, (), BackendError> {
        Box::pin(async move {
            info!(server_id = %server_id, region = %region, "deleting container instance");
            tolerate_missing(
                self.delete_instance(server_id, region).await,
                server_id,
                "instance",
            )?;
            tolerate_missing(
                self.firewall.delete(server_id, region).await,
                server_id,
                "firewall group",
            )?;
            info!(server_id = %server_id, "container instance deleted");
            Ok(())
        })
    }
}

impl std::fmt::Debug for ContainerInstanceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerInstanceBackend")
            .field("toolkit", &self.toolkit)
            .finish_non_exhaustive()
    }
}
