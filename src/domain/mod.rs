//! Fleet data model.

mod context;
mod credentials;
mod identity;
mod ids;
mod server;

pub use context::{DeploymentContext, StatusUpdater, silent_status_updater};
pub use credentials::{CredentialGenerator, RandomCredentials, ServerCredentials};
pub use identity::{InvalidAccountId, PlayerIdentity};
pub use ids::{Region, ServerId, VariantName};
pub use server::{
    DeployedServer, Server, ServerActivity, ServerConnection, ServerStatus, UnknownStatus,
};
