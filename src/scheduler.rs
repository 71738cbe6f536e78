//! Periodic driver for reconciliation jobs.
//!
//! Each job gets its own loop. A run that overlaps its next tick makes the
//! scheduler skip that tick rather than queue a burst of catch-up runs, so a
//! job never overlaps itself.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::config::FleetConfig;
use crate::policy::{
    CreditExhaustionReaper, CreditMeter, EmptyServerReaper, LongRunningReaper, PolicyDeps,
    ReconciliationJob, ServerMetricsCollector, StuckPendingReaper,
};

/// A job and how often it runs.
pub struct ScheduledJob {
    /// Job to run.
    pub job: Arc<dyn ReconciliationJob>,
    /// Time between the starts of two runs.
    pub every: Duration,
}

impl ScheduledJob {
    /// Pairs `job` with its period.
    #[must_use]
    pub fn new(job: Arc<dyn ReconciliationJob>, every: Duration) -> Self {
        Self { job, every }
    }
}

/// Builds the reconciliation jobs of a fleet, each running every
/// [`FleetConfig::job_interval`]. The credit jobs are left out unless credits
/// are enabled.
#[must_use]
pub fn fleet_jobs(deps: &PolicyDeps, config: &FleetConfig) -> Vec<ScheduledJob> {
    let settings = config.policy_settings();
    let mut jobs: Vec<Arc<dyn ReconciliationJob>> = vec![
        Arc::new(EmptyServerReaper::new(deps.clone(), settings)),
        Arc::new(LongRunningReaper::new(deps.clone(), settings)),
        Arc::new(StuckPendingReaper::new(deps.clone(), settings)),
        Arc::new(ServerMetricsCollector::new(deps.clone())),
    ];
    if config.credits_enabled {
        jobs.push(Arc::new(CreditMeter::new(deps.clone())));
        jobs.push(Arc::new(CreditExhaustionReaper::new(deps.clone(), settings)));
    }
    let every = config.job_interval();
    jobs.into_iter()
        .map(|job| ScheduledJob::new(job, every))
        .collect()
}

/// Handle over running job loops.
#[derive(Debug)]
pub struct Scheduler {
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// Starts one loop per job. The first run of every job happens
    /// immediately.
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn spawn(jobs: Vec<ScheduledJob>) -> Self {
        let tracker = TaskTracker::new();
        let shutdown = CancellationToken::new();
        for scheduled in jobs {
            tracker.spawn(run_loop(scheduled, shutdown.child_token()));
        }
        tracker.close();
        Self { tracker, shutdown }
    }

    /// Stops every loop and waits for in-flight runs to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.tracker.wait().await;
    }
}

async fn run_loop(scheduled: ScheduledJob, shutdown: CancellationToken) {
    let ScheduledJob { job, every } = scheduled;
    let name = job.name();
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(job = name, every_secs = every.as_secs(), "job scheduled");
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        debug!(job = name, "job run started");
        match job.run().await {
            Ok(()) => debug!(job = name, "job run finished"),
            Err(err) => error!(job = name, error = %err, "job run failed"),
        }
    }
    info!(job = name, "job stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use rstest::rstest;

    use super::*;
    use crate::future::BoxFuture;
    use crate::policy::PolicyError;
    use crate::settle::AggregateError;
    use crate::test_support::TestFleet;

    #[derive(Default)]
    struct Counting {
        runs: AtomicU32,
        failing: bool,
    }

    impl ReconciliationJob for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn run(&self) -> BoxFuture<'_, (), PolicyError> {
            Box::pin(async move {
                self.runs.fetch_add(1, Ordering::SeqCst);
                if self.failing {
                    let failure = AggregateError::from_errors("counting", [String::from("boom")]);
                    return failure.map_or(Ok(()), |err| Err(err.into()));
                }
                Ok(())
            })
        }
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    #[tokio::test(start_paused = true)]
    async fn jobs_keep_running_on_their_period(#[case] failing: bool) {
        let job = Arc::new(Counting {
            failing,
            ..Counting::default()
        });
        let scheduler = Scheduler::spawn(vec![ScheduledJob::new(
            Arc::clone(&job) as Arc<dyn ReconciliationJob>,
            Duration::from_secs(60),
        )]);

        tokio::time::sleep(Duration::from_secs(150)).await;
        scheduler.shutdown().await;

        assert_eq!(job.runs.load(Ordering::SeqCst), 3);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_further_runs() {
        let job = Arc::new(Counting::default());
        let scheduler = Scheduler::spawn(vec![ScheduledJob::new(
            Arc::clone(&job) as Arc<dyn ReconciliationJob>,
            Duration::from_secs(60),
        )]);
        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.shutdown().await;
        let after_shutdown = job.runs.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(600)).await;

        assert_eq!(after_shutdown, 1);
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
    }

    fn config(credits_enabled: bool) -> FleetConfig {
        FleetConfig {
            credits_enabled,
            empty_minutes: 10,
            max_runtime_hours: 12,
            pending_grace_minutes: 15,
            low_credit_threshold: 10,
            console_port: 27_015,
            console_timeout_ms: 5_000,
            readiness_timeout_secs: 300,
            readiness_interval_secs: 5,
            job_interval_secs: 30,
            catalog_path: String::from("catalog.json"),
        }
    }

    #[rstest]
    #[case(false, vec![
        "empty-server-reaper",
        "long-running-reaper",
        "stuck-pending-reaper",
        "server-metrics-collector",
    ])]
    #[case(true, vec![
        "empty-server-reaper",
        "long-running-reaper",
        "stuck-pending-reaper",
        "server-metrics-collector",
        "credit-meter",
        "credit-exhaustion-reaper",
    ])]
    fn credit_jobs_follow_the_credit_setting(
        #[case] credits_enabled: bool,
        #[case] expected: Vec<&str>,
    ) {
        let fleet = TestFleet::new();
        let jobs = fleet_jobs(&fleet.policy_deps(), &config(credits_enabled));

        let names: Vec<&str> = jobs.iter().map(|scheduled| scheduled.job.name()).collect();
        assert_eq!(names, expected);
        assert!(
            jobs.iter()
                .all(|scheduled| scheduled.every == Duration::from_secs(30))
        );
    }
}
