//! Samples the current map of every ready server.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::domain::{Server, ServerId, ServerStatus};
use crate::future::BoxFuture;
use crate::repository::ServerStatusMetric;
use crate::settle::{AggregateError, settle_all};

use super::{PolicyDeps, PolicyError, ReconciliationJob};

/// What one run of [`ServerMetricsCollector`] did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MetricsSweep {
    /// Servers whose sample was stored.
    pub recorded: Vec<ServerId>,
    /// Servers that did not answer the status query.
    pub unreachable: Vec<ServerId>,
    /// Servers whose status named no map.
    pub unmapped: Vec<ServerId>,
}

enum Sample {
    Recorded(ServerId),
    Unreachable(ServerId),
    Unmapped(ServerId),
}

/// Status-sampling job.
///
/// Probe failures only cost the affected server its sample; failed writes
/// are reported together once every server was handled.
#[derive(Debug)]
pub struct ServerMetricsCollector {
    deps: PolicyDeps,
}

impl ServerMetricsCollector {
    /// Creates the job.
    #[must_use]
    pub const fn new(deps: PolicyDeps) -> Self {
        Self { deps }
    }

    /// Runs the job, stamping every sample with `now`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Repository`] when the servers cannot be loaded
    /// and [`PolicyError::Aggregate`] when any sample could not be stored.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<MetricsSweep, PolicyError> {
        let servers = self
            .deps
            .lifecycle
            .deps()
            .store
            .servers(Some(ServerStatus::Ready))
            .await?;

        let settled = settle_all(servers.iter().map(|server| self.sample(server, now))).await;
        let mut sweep = MetricsSweep::default();
        for sample in settled.succeeded {
            match sample {
                Sample::Recorded(id) => sweep.recorded.push(id),
                Sample::Unreachable(id) => sweep.unreachable.push(id),
                Sample::Unmapped(id) => sweep.unmapped.push(id),
            }
        }
        AggregateError::from_errors("storing server metrics", settled.failed)
            .map_or(Ok(sweep), |err| Err(err.into()))
    }

    async fn sample(&self, server: &Server, now: DateTime<Utc>) -> Result<Sample, String> {
        let server_id = server.server_id.clone();
        let Some(connection) = &server.connection else {
            warn!(server_id = %server_id, "ready server has no console address");
            return Ok(Sample::Unreachable(server_id));
        };
        let report = match self
            .deps
            .probe
            .status(
                &connection.rcon_address,
                &connection.credentials.rcon_password,
            )
            .await
        {
            Ok(report) => report,
            Err(err) => {
                warn!(server_id = %server_id, error = %err, "failed to collect metrics from server");
                return Ok(Sample::Unreachable(server_id));
            }
        };
        let Some(map) = report.map else {
            warn!(server_id = %server_id, "could not extract map from server status");
            return Ok(Sample::Unmapped(server_id));
        };
        let metric = ServerStatusMetric {
            server_id: server_id.clone(),
            map,
            recorded_at: now,
        };
        self.deps
            .metrics
            .save(metric)
            .await
            .map(|()| Sample::Recorded(server_id.clone()))
            .map_err(|err| format!("{server_id}: {err}"))
    }
}

impl ReconciliationJob for ServerMetricsCollector {
    fn name(&self) -> &'static str {
        "server-metrics-collector"
    }

    fn run(&self) -> BoxFuture<'_, (), PolicyError> {
        Box::pin(async move {
            let sweep = self.run_at(Utc::now()).await?;
            info!(
                recorded = sweep.recorded.len(),
                unreachable = sweep.unreachable.len(),
                unmapped = sweep.unmapped.len(),
                "server metrics collected"
            );
            Ok(())
        })
    }
}
