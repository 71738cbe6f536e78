//! Deployment strategies that provision and tear down game servers.
//!
//! Every cloud backend implements [`DeploymentOrchestrator`]. Shared code
//! never branches on the backend type: [`OrchestratorFactory`] looks up the
//! region's [`BackendKind`] in the catalog and dispatches to the registered
//! strategy.

mod container_instance;
mod container_service;
mod firewall;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cancel::CancellationRegistry;
use crate::catalog::{BackendKind, Catalog, CatalogError};
use crate::domain::{
    CredentialGenerator, DeployedServer, DeploymentContext, Region, ServerConnection,
    ServerCredentials, ServerId,
};
use crate::future::BoxFuture;
use crate::poll::{PollOptions, WaitError, wait_until};
use crate::probe::{Endpoint, HealthProbe, ProbeError};

pub use container_instance::{
    ContainerInstanceBackend, InstanceLaunch, InstanceService, InstanceSnapshot, InstanceState,
};
pub use firewall::{FirewallRule, FirewallService, GAME_SERVER_RULES, Protocol};
pub use container_service::{
    ComputeLaunch, ComputeService, ContainerServiceBackend, ContainerServiceClients,
    WorkloadDefinitionService, WorkloadServiceManager,
};

/// Port the spectator feed listens on.
pub const DEFAULT_TV_PORT: u16 = 27_020;

/// Errors raised by deployment strategies and their cloud clients.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Raised when the addressed cloud resource does not exist.
    #[error("{resource} not found")]
    NotFound {
        /// Description of the missing resource.
        resource: String,
    },
    /// Raised when the provider has no capacity for the requested shape.
    #[error("no capacity for shape {shape} in region {region}")]
    InsufficientCapacity {
        /// Region that lacks capacity.
        region: Region,
        /// Requested shape.
        shape: String,
    },
    /// Raised when the deployment was cancelled by a concurrent deletion.
    #[error("deployment cancelled")]
    Cancelled,
    /// Raised when a polling step exceeded its time budget.
    #[error("timed out waiting for {action}: {last_error}")]
    Timeout {
        /// Step being waited on.
        action: String,
        /// Failure reported by the last attempt.
        last_error: String,
    },
    /// Raised by polling conditions while a resource has not converged yet.
    #[error("{resource} is not ready: {detail}")]
    NotReady {
        /// Resource being observed.
        resource: String,
        /// Current observation.
        detail: String,
    },
    /// Wrapper for provider level failures.
    #[error("provider error: {message}")]
    Provider {
        /// Message returned by the provider.
        message: String,
    },
    /// Raised when the region or variant configuration is unusable.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },
    /// Raised when a direct health probe fails.
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

impl BackendError {
    /// Returns `true` when the error reports a missing resource.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Builds a [`BackendError::NotFound`].
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    fn from_wait<E>(action: &str, err: WaitError<E>) -> Self
    where
        E: std::error::Error + 'static,
    {
        match err {
            WaitError::Cancelled => Self::Cancelled,
            WaitError::Timeout { last, .. } => Self::Timeout {
                action: action.to_owned(),
                last_error: last.to_string(),
            },
        }
    }
}

impl From<CatalogError> for BackendError {
    fn from(value: CatalogError) -> Self {
        Self::Configuration {
            message: value.to_string(),
        }
    }
}

/// Strategy that provisions and removes one kind of game-server deployment.
pub trait DeploymentOrchestrator: Send + Sync {
    /// Provisions a server and waits until it accepts players.
    fn deploy(&self, context: DeploymentContext) -> BoxFuture<'_, DeployedServer, BackendError>;

    /// Removes every cloud resource belonging to `server_id`.
    ///
    /// Implementations must be idempotent: missing resources count as
    /// already deleted.
    fn delete<'a>(
        &'a self,
        server_id: &'a ServerId,
        region: &'a Region,
    ) -> BoxFuture<'a, (), BackendError>;
}

/// Time budgets for the polling steps of a deployment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StepTimings {
    /// Interval and timeout while waiting for a network attachment.
    pub network: (Duration, Duration),
    /// Interval and timeout while waiting for an instance to become active.
    pub activation: (Duration, Duration),
    /// Interval and timeout while waiting for a workload service to settle.
    pub stabilisation: (Duration, Duration),
    /// Interval and timeout while waiting for teardown to finish.
    pub teardown: (Duration, Duration),
}

impl Default for StepTimings {
    fn default() -> Self {
        Self {
            network: (Duration::from_secs(1), Duration::from_secs(30)),
            activation: (Duration::from_secs(5), Duration::from_secs(480)),
            stabilisation: (Duration::from_secs(15), Duration::from_secs(900)),
            teardown: (Duration::from_secs(5), Duration::from_secs(300)),
        }
    }
}

impl StepTimings {
    /// Uses the same interval and timeout for every step.
    #[must_use]
    pub const fn uniform(interval: Duration, timeout: Duration) -> Self {
        Self {
            network: (interval, timeout),
            activation: (interval, timeout),
            stabilisation: (interval, timeout),
            teardown: (interval, timeout),
        }
    }
}

/// Collaborators shared by every strategy.
#[derive(Clone)]
pub struct DeploymentToolkit {
    /// Variant and region configuration.
    pub catalog: Arc<Catalog>,
    /// Source of per-deployment credentials.
    pub credentials: Arc<dyn CredentialGenerator>,
    /// Readiness probe.
    pub probe: HealthProbe,
    /// Per-server cancellation tokens.
    pub registry: Arc<CancellationRegistry>,
    /// Polling budgets.
    pub timings: StepTimings,
}

impl DeploymentToolkit {
    /// Token observed by every step of one deployment.
    ///
    /// Fetched once up front: a deletion removes the registry entry when it
    /// cancels, so a later lookup would hand out a fresh, live token.
    fn token(&self, server_id: &ServerId) -> CancellationToken {
        self.registry.get_or_create(server_id)
    }

    async fn poll<T, F, Fut>(
        &self,
        token: &CancellationToken,
        action: &str,
        (interval, timeout): (Duration, Duration),
        condition: F,
    ) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let options =
            PollOptions::new(interval, timeout).with_cancellation(token.clone());
        wait_until(condition, &options)
            .await
            .map_err(|err| BackendError::from_wait(action, err))
    }

    async fn wait_for_game(
        &self,
        public_ip: &str,
        credentials: &ServerCredentials,
        server_id: &ServerId,
        token: &CancellationToken,
    ) -> Result<Endpoint, BackendError> {
        self.probe
            .wait_for_ready(
                public_ip,
                &credentials.rcon_password,
                server_id,
                token.clone(),
            )
            .await
            .map_err(|err| BackendError::from_wait::<ProbeError>("game server readiness", err))
    }

    fn finish(
        &self,
        context: &DeploymentContext,
        public_ip: &str,
        endpoint: Endpoint,
        credentials: ServerCredentials,
    ) -> DeployedServer {
        self.registry.delete(context.server_id());
        info!(
            server_id = %context.server_id(),
            region = %context.region(),
            public_ip,
            endpoint = %endpoint,
            "server deployment completed"
        );
        DeployedServer {
            server_id: context.server_id().clone(),
            region: context.region().clone(),
            variant: context.variant().clone(),
            connection: ServerConnection {
                host_ip: endpoint.ip,
                host_port: endpoint.port,
                tv_ip: public_ip.to_owned(),
                tv_port: DEFAULT_TV_PORT,
                rcon_address: public_ip.to_owned(),
                credentials,
            },
        }
    }
}

impl std::fmt::Debug for DeploymentToolkit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentToolkit")
            .field("probe", &self.probe)
            .field("timings", &self.timings)
            .finish_non_exhaustive()
    }
}

/// Treats a missing resource as already removed.
fn tolerate_missing(
    result: Result<(), BackendError>,
    server_id: &ServerId,
    step: &str,
) -> Result<(), BackendError> {
    match result {
        Err(err) if err.is_not_found() => {
            debug!(server_id = %server_id, step, "resource already gone");
            Ok(())
        }
        Err(err) => {
            warn!(server_id = %server_id, step, error = %err, "teardown step failed");
            Err(err)
        }
        ok @ Ok(()) => ok,
    }
}

/// Dispatches to the strategy registered for a region's backend kind.
#[derive(Clone)]
pub struct OrchestratorFactory {
    catalog: Arc<Catalog>,
    strategies: HashMap<BackendKind, Arc<dyn DeploymentOrchestrator>>,
}

impl OrchestratorFactory {
    /// Creates a factory with no registered strategies.
    #[must_use]
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            strategies: HashMap::new(),
        }
    }

    /// Registers the strategy serving `kind`, replacing any previous one.
    #[must_use]
    pub fn with_strategy(
        mut self,
        kind: BackendKind,
        strategy: Arc<dyn DeploymentOrchestrator>,
    ) -> Self {
        self.strategies.insert(kind, strategy);
        self
    }

    /// Returns the strategy serving `region`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Configuration`] when the region is unknown or
    /// no strategy is registered for its backend kind.
    pub fn for_region(
        &self,
        region: &Region,
    ) -> Result<Arc<dyn DeploymentOrchestrator>, BackendError> {
        let kind = self.catalog.region(region)?.backend;
        self.strategies
            .get(&kind)
            .cloned()
            .ok_or_else(|| BackendError::Configuration {
                message: format!("no strategy registered for backend {kind} (region {region})"),
            })
    }
}

impl DeploymentOrchestrator for OrchestratorFactory {
    fn deploy(&self, context: DeploymentContext) -> BoxFuture<'_, DeployedServer, BackendError> {
        Box::pin(async move {
            let strategy = self.for_region(context.region())?;
            strategy.deploy(context).await
        })
    }

    fn delete<'a>(
        &'a self,
        server_id: &'a ServerId,
        region: &'a Region,
    ) -> BoxFuture<'a, (), BackendError> {
        Box::pin(async move {
            let strategy = self.for_region(region)?;
            strategy.delete(server_id, region).await
        })
    }
}

impl std::fmt::Debug for OrchestratorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorFactory")
            .field("kinds", &self.strategies.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
