//! Strategy for container services scheduled onto dedicated compute hosts.
//!
//! A compute host is launched per server and a long-running workload service
//! places the game container onto it. Teardown walks the resources in the
//! reverse dependency order: service, host, workload definition, firewall.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::catalog::VariantConfig;
use crate::domain::{DeployedServer, DeploymentContext, Region, ServerId};
use crate::environment::build_environment;
use crate::future::BoxFuture;

use super::firewall::FirewallService;
use super::{BackendError, DeploymentOrchestrator, DeploymentToolkit, tolerate_missing};

/// Registers and removes workload (task) definitions.
pub trait WorkloadDefinitionService: Send + Sync {
    /// Registers the container definition and returns its reference.
    fn register<'a>(
        &'a self,
        server_id: &'a ServerId,
        region: &'a Region,
        variant: &'a VariantConfig,
        environment: &'a BTreeMap<String, String>,
    ) -> BoxFuture<'a, String, BackendError>;

    /// Deregisters the definition created for `server_id`.
    fn deregister<'a>(
        &'a self,
        server_id: &'a ServerId,
        region: &'a Region,
    ) -> BoxFuture<'a, (), BackendError>;
}

/// Parameters for launching a dedicated compute host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ComputeLaunch {
    /// Server the host is dedicated to.
    pub server_id: ServerId,
    /// Target region.
    pub region: Region,
    /// Host shape.
    pub shape: String,
    /// Firewall group attached to the host.
    pub firewall_group: String,
}

/// Launches and terminates compute hosts.
pub trait ComputeService: Send + Sync {
    /// Launches a host and returns its identifier.
    ///
    /// Providers report exhausted capacity as
    /// [`BackendError::InsufficientCapacity`].
    fn launch<'a>(&'a self, launch: &'a ComputeLaunch) -> BoxFuture<'a, String, BackendError>;

    /// Resolves the public address of a host.
    fn public_ip<'a>(
        &'a self,
        instance_id: &'a str,
        region: &'a Region,
    ) -> BoxFuture<'a, String, BackendError>;

    /// Terminates the host dedicated to `server_id`.
    fn terminate<'a>(
        &'a self,
        server_id: &'a ServerId,
        region: &'a Region,
    ) -> BoxFuture<'a, (), BackendError>;
}

/// Manages the long-running service that keeps the container placed.
pub trait WorkloadServiceManager: Send + Sync {
    /// Creates the service and returns its reference.
    fn create<'a>(
        &'a self,
        server_id: &'a ServerId,
        region: &'a Region,
        definition: &'a str,
    ) -> BoxFuture<'a, String, BackendError>;

    /// Returns whether the service has reached its desired running count.
    fn is_stable<'a>(
        &'a self,
        service: &'a str,
        region: &'a Region,
    ) -> BoxFuture<'a, bool, BackendError>;

    /// Deletes the service created for `server_id`.
    fn delete<'a>(
        &'a self,
        server_id: &'a ServerId,
        region: &'a Region,
    ) -> BoxFuture<'a, (), BackendError>;
}

/// Provider clients used by [`ContainerServiceBackend`].
#[derive(Clone)]
pub struct ContainerServiceClients {
    /// Firewall groups.
    pub firewall: Arc<dyn FirewallService>,
    /// Workload definitions.
    pub definitions: Arc<dyn WorkloadDefinitionService>,
    /// Compute hosts.
    pub compute: Arc<dyn ComputeService>,
    /// Workload services.
    pub services: Arc<dyn WorkloadServiceManager>,
}

/// [`DeploymentOrchestrator`] over a container service on dedicated hosts.
#[derive(Clone)]
pub struct ContainerServiceBackend {
    toolkit: DeploymentToolkit,
    clients: ContainerServiceClients,
}

impl ContainerServiceBackend {
    /// Creates the strategy.
    #[must_use]
    pub const fn new(toolkit: DeploymentToolkit, clients: ContainerServiceClients) -> Self {
        Self { toolkit, clients }
    }

    async fn run_deployment(
        &self,
        context: &DeploymentContext,
    ) -> Result<DeployedServer, BackendError> {
        let server_id = context.server_id();
        let region = context.region();
        let clients = &self.clients;
        let token = self.toolkit.token(server_id);

        let credentials = self.toolkit.credentials.generate();
        let variant = self
            .toolkit
            .catalog
            .variant_for(context.variant(), context.guild_id())?;
        let region_config = self.toolkit.catalog.region(region)?;
        let environment = build_environment(context, &credentials, &variant, region_config);

        context.report("[1/7] Creating firewall group...").await;
        let firewall_group = clients.firewall.create(server_id, region).await?;

        context.report("[2/7] Registering workload definition...").await;
        let definition = clients
            .definitions
            .register(server_id, region, &variant, &environment)
            .await?;

        context.report("[3/7] Launching compute host...").await;
        let launch = ComputeLaunch {
            server_id: server_id.clone(),
            region: region.clone(),
            shape: variant.shape.clone(),
            firewall_group,
        };
        let instance_id = clients.compute.launch(&launch).await?;
        info!(server_id = %server_id, instance_id = %instance_id, "compute host launched");

        context.report("[4/7] Creating workload service...").await;
        let service = clients
            .services
            .create(server_id, region, &definition)
            .await?;

        context
            .report("[5/7] Waiting for workload service to stabilise...")
            .await;
        self.toolkit
            .poll(
                &token,
                "workload service stability",
                self.toolkit.timings.stabilisation,
                || self.stable(&service, region),
            )
            .await?;

        context.report("[6/7] Resolving public address...").await;
        let public_ip = clients.compute.public_ip(&instance_id, region).await?;

        context
            .report("[7/7] Waiting for game server to accept console commands...")
            .await;
        let endpoint = self
            .toolkit
            .wait_for_game(&public_ip, &credentials, server_id, &token)
            .await?;

        Ok(self
            .toolkit
            .finish(context, &public_ip, endpoint, credentials))
    }

    async fn stable(&self, service: &str, region: &Region) -> Result<(), BackendError> {
        if self.clients.services.is_stable(service, region).await? {
            return Ok(());
        }
        Err(BackendError::NotReady {
            resource: format!("service {service}"),
            detail: String::from("running count below desired count"),
        })
    }
}

impl DeploymentOrchestrator for ContainerServiceBackend {
    fn deploy(&self, context: DeploymentContext) -> BoxFuture<'_, DeployedServer, BackendError> {
        Box::pin(async move {
            info!(
                server_id = %context.server_id(),
                region = %context.region(),
                variant = %context.variant(),
                "starting container-service deployment"
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
            let clients = &self.clients;
            info!(server_id = %server_id, region = %region, "deleting container-service deployment");
            tolerate_missing(
                clients.services.delete(server_id, region).await,
                server_id,
                "workload service",
            )?;
            tolerate_missing(
                clients.compute.terminate(server_id, region).await,
                server_id,
                "compute host",
            )?;
            tolerate_missing(
                clients.definitions.deregister(server_id, region).await,
                server_id,
                "workload definition",
            )?;
            tolerate_missing(
                clients.firewall.delete(server_id, region).await,
                server_id,
                "firewall group",
            )?;
            info!(server_id = %server_id, "container-service deployment deleted");
            Ok(())
        })
    }
}

impl std::fmt::Debug for ContainerServiceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerServiceBackend")
            .field("toolkit", &self.toolkit)
            .finish_non_exhaustive()
    }
}
