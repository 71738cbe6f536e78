//! Game-server health probing over the remote console.
//!
//! The probe issues `status`, parses the reply, and exposes two consumers:
//! reconciliation reads the player count, and deployments poll until the
//! spectator feed shows up, which happens only once the server has finished
//! loading.

mod status;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::console::{ConsoleError, ConsoleSettings, RemoteConsole};
use crate::domain::ServerId;
use crate::poll::{PollOptions, WaitError, wait_until};

pub use status::{Endpoint, StatusParseError, StatusReport};

const STATUS_COMMAND: &str = "status";

/// Default time allowed for a fresh server to become ready.
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(300);
/// Default delay between readiness probes.
pub const DEFAULT_READINESS_INTERVAL: Duration = Duration::from_secs(5);

/// Errors raised by [`HealthProbe`].
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Raised when the console exchange fails.
    #[error(transparent)]
    Console(#[from] ConsoleError),
    /// Raised when the reply cannot be parsed.
    #[error(transparent)]
    Parse(#[from] StatusParseError),
    /// Raised while the server has not published its spectator feed.
    #[error("server at {host} is not ready yet")]
    NotReady {
        /// Host that was probed.
        host: String,
    },
    /// Raised when a ready server does not report its game endpoint.
    #[error("server at {host} did not report its game endpoint")]
    MissingEndpoint {
        /// Host that was probed.
        host: String,
    },
}

/// Readiness polling parameters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReadinessSettings {
    /// Total time allowed.
    pub timeout: Duration,
    /// Delay between probes.
    pub interval: Duration,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_READINESS_TIMEOUT,
            interval: DEFAULT_READINESS_INTERVAL,
        }
    }
}

/// Status query and readiness wait over a [`RemoteConsole`].
#[derive(Clone)]
pub struct HealthProbe {
    console: Arc<dyn RemoteConsole>,
    console_settings: ConsoleSettings,
    readiness: ReadinessSettings,
}

impl HealthProbe {
    /// Creates a probe.
    #[must_use]
    pub fn new(
        console: Arc<dyn RemoteConsole>,
        console_settings: ConsoleSettings,
        readiness: ReadinessSettings,
    ) -> Self {
        Self {
            console,
            console_settings,
            readiness,
        }
    }

    /// Queries and parses the server status.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Console`] or [`ProbeError::Parse`].
    pub async fn status(&self, host: &str, password: &str) -> Result<StatusReport, ProbeError> {
        let reply = self
            .console
            .query(
                host,
                self.console_settings.port,
                password,
                STATUS_COMMAND,
                self.console_settings.timeout,
            )
            .await?;
        Ok(StatusReport::parse(&reply)?)
    }

    /// Polls [`HealthProbe::status`] until the server reports its spectator
    /// feed and returns the game endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Cancelled`] when `token` fires and
    /// [`WaitError::Timeout`] wrapping the last probe failure otherwise.
    pub async fn wait_for_ready(
        &self,
        host: &str,
        password: &str,
        server_id: &ServerId,
        token: CancellationToken,
    ) -> Result<Endpoint, WaitError<ProbeError>> {
        info!(server_id = %server_id, host, "waiting for game server readiness");
        let options = PollOptions::new(self.readiness.interval, self.readiness.timeout)
            .with_cancellation(token);
        let endpoint = wait_until(|| self.ready_endpoint(host, password), &options).await?;
        info!(server_id = %server_id, host, endpoint = %endpoint, "game server is ready");
        Ok(endpoint)
    }

    async fn ready_endpoint(&self, host: &str, password: &str) -> Result<Endpoint, ProbeError> {
        let report = self.status(host, password).await?;
        if !report.is_ready() {
            debug!(host, "spectator feed not reported yet");
            return Err(ProbeError::NotReady {
                host: host.to_owned(),
            });
        }
        report.game.ok_or_else(|| ProbeError::MissingEndpoint {
            host: host.to_owned(),
        })
    }
}

impl std::fmt::Debug for HealthProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthProbe")
            .field("console_settings", &self.console_settings)
            .field("readiness", &self.readiness)
            .finish_non_exhaustive()
    }
}
