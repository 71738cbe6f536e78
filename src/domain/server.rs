//! Server rows, their lifecycle status, and activity tracking.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::credentials::ServerCredentials;
use super::ids::{Region, ServerId, VariantName};

/// Lifecycle status of a server row.
///
/// Rows move `pending → ready → terminating` and are then removed. A pending
/// row may also move straight to `terminating` when provisioning is aborted
/// or stuck.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// Row exists, provisioning has started but not finished.
    Pending,
    /// The server answered the readiness probe and is serving players.
    Ready,
    /// Deletion has started; reconciliation jobs must leave the row alone.
    Terminating,
}

impl ServerStatus {
    /// Returns `true` for statuses that count towards the one-active-server
    /// limit.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Ready)
    }

    /// Returns whether a row in this status may move to `next`.
    ///
    /// `terminating → terminating` is allowed so an interrupted deletion can
    /// be retried.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Ready | Self::Terminating)
                | (Self::Ready | Self::Terminating, Self::Terminating)
        )
    }

    /// Lower-case label used in persistence and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Terminating => "terminating",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a status label cannot be parsed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown server status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for ServerStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "ready" => Ok(Self::Ready),
            "terminating" => Ok(Self::Terminating),
            other => Err(UnknownStatus(other.to_owned())),
        }
    }
}

/// Network endpoints and credentials of a provisioned server.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ServerConnection {
    /// Address players connect to.
    pub host_ip: String,
    /// Game port players connect to.
    pub host_port: u16,
    /// Spectator-feed address.
    pub tv_ip: String,
    /// Spectator-feed port.
    pub tv_port: u16,
    /// Address the remote console listens on.
    pub rcon_address: String,
    /// Generated passwords and log secret.
    pub credentials: ServerCredentials,
}

/// Flat result record returned by every backend strategy.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeployedServer {
    /// Identifier the deployment was started with.
    pub server_id: ServerId,
    /// Region the server runs in.
    pub region: Region,
    /// Variant the server was started from.
    pub variant: VariantName,
    /// Endpoints and credentials.
    pub connection: ServerConnection,
}

/// One persisted game-server row.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Server {
    /// Stable key.
    pub server_id: ServerId,
    /// Region the server was requested in.
    pub region: Region,
    /// Variant the server was requested with.
    pub variant: VariantName,
    /// Current lifecycle status.
    pub status: ServerStatus,
    /// Owner identifier.
    pub created_by: String,
    /// Optional tenant identifier.
    pub guild_id: Option<String>,
    /// Endpoints and credentials, present once the server is ready.
    pub connection: Option<ServerConnection>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Server {
    /// Builds the `pending` row written before remote provisioning starts.
    #[must_use]
    pub fn pending(
        server_id: ServerId,
        region: Region,
        variant: VariantName,
        created_by: impl Into<String>,
        guild_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            server_id,
            region,
            variant,
            status: ServerStatus::Pending,
            created_by: created_by.into(),
            guild_id,
            connection: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns a copy of this row promoted to `ready` with the deployment
    /// result applied.
    #[must_use]
    pub fn into_ready(self, deployed: DeployedServer, now: DateTime<Utc>) -> Self {
        Self {
            status: ServerStatus::Ready,
            connection: Some(deployed.connection),
            updated_at: now,
            ..self
        }
    }

    /// Returns a copy with the given status and a refreshed timestamp.
    #[must_use]
    pub fn with_status(self, status: ServerStatus, now: DateTime<Utc>) -> Self {
        Self {
            status,
            updated_at: now,
            ..self
        }
    }

    /// Minutes elapsed since the row was created.
    #[must_use]
    pub fn age_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_minutes()
    }
}

/// Reconciliation bookkeeping kept alongside each server row.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ServerActivity {
    /// Server the activity belongs to.
    pub server_id: ServerId,
    /// When a probe first observed zero players, cleared once anyone joins.
    pub empty_since: Option<DateTime<Utc>>,
    /// When the server was last probed.
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl ServerActivity {
    /// Activity for a server that has never been probed.
    #[must_use]
    pub const fn unchecked(server_id: ServerId) -> Self {
        Self {
            server_id,
            empty_since: None,
            last_checked_at: None,
        }
    }
}
