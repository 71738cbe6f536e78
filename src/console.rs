//! Remote-console contract and the broadcast helper built on it.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::domain::{ServerConnection, ServerId};
use crate::future::BoxFuture;

/// Default remote-console port.
pub const DEFAULT_CONSOLE_PORT: u16 = 27_015;
/// Default timeout for a single console query.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised by [`RemoteConsole`] implementations.
#[derive(Debug, Error)]
pub enum ConsoleError {
    /// Raised when the TCP connection cannot be established.
    #[error("failed to connect to console at {address}: {source}")]
    Connect {
        /// `host:port` that was dialled.
        address: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// Raised when the server rejects the console password.
    #[error("console at {address} rejected the password")]
    Authentication {
        /// `host:port` that rejected the password.
        address: String,
    },
    /// Raised when the full exchange does not finish within the timeout.
    #[error("console query to {address} timed out after {timeout:?}")]
    Timeout {
        /// `host:port` being queried.
        address: String,
        /// Configured timeout.
        timeout: Duration,
    },
    /// Raised when a reply does not follow the wire protocol.
    #[error("console protocol error: {message}")]
    Protocol {
        /// Description of the malformed reply.
        message: String,
    },
    /// Raised on I/O failures after the connection was established.
    #[error("console I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Executes commands on a game server's remote console.
pub trait RemoteConsole: Send + Sync {
    /// Sends `command` to `host:port` authenticated with `password` and
    /// returns the textual reply.
    fn query<'a>(
        &'a self,
        host: &'a str,
        port: u16,
        password: &'a str,
        command: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, String, ConsoleError>;
}

/// Port and timeout applied to every console exchange.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConsoleSettings {
    /// Remote-console port.
    pub port: u16,
    /// Per-query timeout.
    pub timeout: Duration,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_CONSOLE_PORT,
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

/// Sends in-game chat messages to running servers.
#[derive(Clone)]
pub struct Broadcaster {
    console: Arc<dyn RemoteConsole>,
    settings: ConsoleSettings,
}

impl Broadcaster {
    /// Creates a broadcaster over the given console.
    #[must_use]
    pub fn new(console: Arc<dyn RemoteConsole>, settings: ConsoleSettings) -> Self {
        Self { console, settings }
    }

    /// Sends `say <message>` to the server behind `connection`.
    ///
    /// # Errors
    ///
    /// Propagates the console failure.
    pub async fn say(
        &self,
        connection: &ServerConnection,
        message: &str,
    ) -> Result<String, ConsoleError> {
        let command = format!("say {message}");
        self.console
            .query(
                &connection.rcon_address,
                self.settings.port,
                &connection.credentials.rcon_password,
                &command,
                self.settings.timeout,
            )
            .await
    }

    /// Best-effort variant of [`Broadcaster::say`]: failures are logged and
    /// dropped.
    ///
    /// Servers without a connection (still pending) are skipped silently.
    pub async fn say_best_effort(
        &self,
        server_id: &ServerId,
        connection: Option<&ServerConnection>,
        message: &str,
    ) {
        let Some(target) = connection else {
            return;
        };
        if let Err(err) = self.say(target, message).await {
            warn!(server_id = %server_id, error = %err, "broadcast failed");
        }
    }
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
