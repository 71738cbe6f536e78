//! Core library for the quickserver fleet orchestrator.
//!
//! The crate provisions short-lived, pay-per-minute game servers on demand,
//! tracks them through a persisted lifecycle, and reclaims them once they go
//! idle, run too long, get stuck while provisioning, or exhaust their owner's
//! credits. Cloud providers sit behind the [`DeploymentOrchestrator`] seam
//! and persistence behind the traits in [`repository`].

pub mod backend;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod console;
pub mod domain;
pub mod environment;
pub mod future;
pub mod lifecycle;
pub mod poll;
pub mod policy;
pub mod probe;
pub mod queue;
pub mod rcon;
pub mod repository;
pub mod scaleway;
pub mod scheduler;
pub mod settle;
pub mod test_support;

pub use backend::{
    BackendError, ContainerInstanceBackend, ContainerServiceBackend, DeploymentOrchestrator,
    OrchestratorFactory,
};
pub use cancel::CancellationRegistry;
pub use catalog::{
    BackendKind, Catalog, CatalogError, GuildVariant, RegionConfig, VariantConfig,
};
pub use config::{ConfigError, FleetConfig, ScalewayConfig};
pub use console::{Broadcaster, ConsoleError, ConsoleSettings, RemoteConsole};
pub use domain::{
    DeployedServer, PlayerIdentity, Region, Server, ServerActivity, ServerId, ServerStatus,
    VariantName,
};
pub use lifecycle::{
    CreateServerRequest, LifecycleDeps, LifecycleError, ServerLifecycle, TerminationReason,
    UserError,
};
pub use policy::{
    CreditExhaustionReaper, CreditMeter, EmptyServerReaper, LongRunningReaper, PolicyDeps,
    PolicyError, PolicySettings, ReconciliationJob, StuckPendingReaper,
};
pub use probe::{Endpoint, HealthProbe, ProbeError, ReadinessSettings, StatusReport};
pub use queue::{BackgroundTaskQueue, DeleteServerProcessor, QueueError, RetryPolicy};
pub use rcon::SourceRcon;
pub use repository::{FleetStore, RepositoryError};
pub use scaleway::{ScalewayClient, ScalewayClientError};
pub use scheduler::{ScheduledJob, Scheduler, fleet_jobs};
pub use settle::AggregateError;
