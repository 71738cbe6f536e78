//! Persistence and notification contracts consumed by the fleet engine.
//!
//! The engine never talks to a database directly. Every use case receives
//! these collaborators explicitly, and the invariants that span several rows
//! (one active server per owner, no double deletion) are enforced by
//! re-reading inside a [`StoreTransaction`] before mutating.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{PlayerIdentity, Server, ServerActivity, ServerId, ServerStatus};
use crate::future::BoxFuture;

/// Errors raised by repository implementations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RepositoryError {
    /// Raised when the store cannot be reached or the operation failed.
    #[error("repository unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },
    /// Raised when a concurrent writer invalidated the transaction.
    #[error("repository conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },
}

impl RepositoryError {
    /// Builds a [`RepositoryError::Unavailable`].
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// One unit of work against the server and activity tables.
///
/// Dropping a transaction without calling [`StoreTransaction::commit`]
/// discards every write made through it.
pub trait StoreTransaction: Send {
    /// Reads one server row.
    fn find_server<'a>(
        &'a mut self,
        server_id: &'a ServerId,
    ) -> BoxFuture<'a, Option<Server>, RepositoryError>;

    /// Lists every row owned by `owner`, whatever its status.
    fn servers_by_owner<'a>(
        &'a mut self,
        owner: &'a str,
    ) -> BoxFuture<'a, Vec<Server>, RepositoryError>;

    /// Lists rows, optionally restricted to one status.
    fn servers(
        &mut self,
        status: Option<ServerStatus>,
    ) -> BoxFuture<'_, Vec<Server>, RepositoryError>;

    /// Inserts or replaces a server row.
    fn upsert_server<'a>(&'a mut self, server: &'a Server) -> BoxFuture<'a, (), RepositoryError>;

    /// Removes a server row. Removing a missing row is not an error.
    fn delete_server<'a>(
        &'a mut self,
        server_id: &'a ServerId,
    ) -> BoxFuture<'a, (), RepositoryError>;

    /// Lists every activity row.
    fn activities(&mut self) -> BoxFuture<'_, Vec<ServerActivity>, RepositoryError>;

    /// Reads the activity row of one server.
    fn find_activity<'a>(
        &'a mut self,
        server_id: &'a ServerId,
    ) -> BoxFuture<'a, Option<ServerActivity>, RepositoryError>;

    /// Inserts or replaces an activity row.
    fn upsert_activity<'a>(
        &'a mut self,
        activity: &'a ServerActivity,
    ) -> BoxFuture<'a, (), RepositoryError>;

    /// Removes the activity row of one server, if any.
    fn delete_activity<'a>(
        &'a mut self,
        server_id: &'a ServerId,
    ) -> BoxFuture<'a, (), RepositoryError>;

    /// Makes every write visible to other transactions.
    fn commit(self: Box<Self>) -> BoxFuture<'static, (), RepositoryError>;
}

/// Transactional store for servers and their activity.
pub trait FleetStore: Send + Sync {
    /// Opens a transaction.
    fn begin(&self) -> BoxFuture<'_, Box<dyn StoreTransaction>, RepositoryError>;

    /// Reads one server row in a short transaction.
    fn find_server<'a>(
        &'a self,
        server_id: &'a ServerId,
    ) -> BoxFuture<'a, Option<Server>, RepositoryError> {
        Box::pin(async move {
            let mut tx = self.begin().await?;
            let server = tx.find_server(server_id).await?;
            tx.commit().await?;
            Ok(server)
        })
    }

    /// Lists rows in a short transaction, optionally restricted to a status.
    fn servers(&self, status: Option<ServerStatus>) -> BoxFuture<'_, Vec<Server>, RepositoryError> {
        Box::pin(async move {
            let mut tx = self.begin().await?;
            let servers = tx.servers(status).await?;
            tx.commit().await?;
            Ok(servers)
        })
    }
}

/// Read access to owners' credit balances.
pub trait CreditsRepository: Send + Sync {
    /// Current balance, or `None` when the owner never bought credits.
    fn balance<'a>(&'a self, owner: &'a str) -> BoxFuture<'a, Option<i64>, RepositoryError>;

    /// Subtracts `amount` and returns the new balance.
    fn subtract<'a>(&'a self, owner: &'a str, amount: i64) -> BoxFuture<'a, i64, RepositoryError>;
}

/// Outcome of a ban lookup.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BanStatus {
    /// No active ban.
    Clear,
    /// An active ban exists.
    Banned {
        /// Reason given by the moderator, if any.
        reason: Option<String>,
    },
}

/// Ban lookups keyed by player identity and bot user id.
pub trait BanRepository: Send + Sync {
    /// Returns the ban status of the requester.
    fn lookup<'a>(
        &'a self,
        identity: &'a PlayerIdentity,
        user_id: &'a str,
    ) -> BoxFuture<'a, BanStatus, RepositoryError>;
}

/// Profile data stored for bot users.
pub trait UserRepository: Send + Sync {
    /// The game-account id the user registered, if any.
    fn account_id<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Option<String>, RepositoryError>;
}

/// Per-tenant parameters.
pub trait TenantRepository: Send + Sync {
    /// Extra container environment configured by a tenant.
    fn extra_environment<'a>(
        &'a self,
        guild_id: &'a str,
    ) -> BoxFuture<'a, BTreeMap<String, String>, RepositoryError>;
}

/// One audit-log entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AuditEvent {
    /// User the action is attributed to.
    pub actor_id: String,
    /// Server concerned, if any.
    pub server_id: Option<ServerId>,
    /// Human-readable description.
    pub message: String,
    /// When the event happened.
    pub recorded_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Builds an event stamped with the current time.
    #[must_use]
    pub fn new(
        actor_id: impl Into<String>,
        server_id: Option<ServerId>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            actor_id: actor_id.into(),
            server_id,
            message: message.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Append-only audit log.
pub trait AuditLog: Send + Sync {
    /// Appends an event.
    fn record(&self, event: AuditEvent) -> BoxFuture<'_, (), RepositoryError>;
}

/// Map a ready server was running when it was sampled.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerStatusMetric {
    /// Sampled server.
    pub server_id: ServerId,
    /// Current map.
    pub map: String,
    /// Sampling time, shared by every server of one collection run.
    pub recorded_at: DateTime<Utc>,
}

/// Append-only store of status samples.
pub trait ServerStatusMetricsRepository: Send + Sync {
    /// Appends a sample.
    fn save(&self, metric: ServerStatusMetric) -> BoxFuture<'_, (), RepositoryError>;
}

/// Raised when a direct message cannot be delivered.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("failed to notify {user_id}: {message}")]
pub struct NotificationError {
    /// Intended recipient.
    pub user_id: String,
    /// Delivery failure.
    pub message: String,
}

/// Outbound direct messages to server owners.
pub trait Notifier: Send + Sync {
    /// Sends `message` to `user_id`.
    fn direct_message<'a>(
        &'a self,
        user_id: &'a str,
        message: &'a str,
    ) -> BoxFuture<'a, (), NotificationError>;
}
