//! Retrying background task queue.
//!
//! Slow work such as backend deletions is handed to the queue so the caller
//! can move on. Each task runs on the tokio runtime, is retried with capped
//! exponential backoff, and reports final failure through its callback.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::ServerId;
use crate::future::BoxFuture;
use crate::lifecycle::{LifecycleError, ServerLifecycle, UserError};

/// Task kind handled by [`DeleteServerProcessor`].
pub const DELETE_SERVER_TASK: &str = "delete-server";

/// Errors raised by the queue and its processors.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum QueueError {
    /// Raised at enqueue time when no processor handles `kind`.
    #[error("no processor registered for task kind '{kind}'")]
    UnknownKind {
        /// Requested kind.
        kind: String,
    },
    /// Raised at enqueue time once shutdown has started.
    #[error("task queue is shutting down")]
    ShuttingDown,
    /// Raised by processors when the payload does not match their kind.
    #[error("invalid payload for task kind '{kind}': {message}")]
    InvalidPayload {
        /// Task kind.
        kind: String,
        /// Decoding failure.
        message: String,
    },
    /// Raised by processors when the work itself failed.
    #[error("task failed: {message}")]
    Failed {
        /// Failure description.
        message: String,
    },
}

/// Handles every task of one kind.
pub trait TaskProcessor: Send + Sync {
    /// Runs one attempt of a task.
    fn process(&self, payload: Value) -> BoxFuture<'_, (), QueueError>;
}

/// Exponential backoff settings for one task.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Factor applied to the delay after each retry.
    pub backoff_multiplier: u32,
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub const NONE: Self = Self {
        max_retries: 0,
        initial_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        backoff_multiplier: 1,
    };

    /// Policy used for deferred server deletions: ten retries starting at one
    /// minute, doubling, capped at ten minutes.
    #[must_use]
    pub const fn deletion() -> Self {
        Self {
            max_retries: 10,
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(600),
            backoff_multiplier: 2,
        }
    }

    /// Delay before retry number `retry` (zero-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.saturating_pow(retry);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::NONE
    }
}

/// Invoked with the last error once a task has exhausted its retries.
pub type ErrorCallback = Arc<dyn Fn(&QueueError) + Send + Sync>;

/// Per-task callbacks.
#[derive(Clone, Default)]
pub struct TaskCallbacks {
    /// Called on final failure.
    pub on_error: Option<ErrorCallback>,
}

impl TaskCallbacks {
    /// Callbacks with only an error handler.
    #[must_use]
    pub fn on_error(callback: impl Fn(&QueueError) + Send + Sync + 'static) -> Self {
        Self {
            on_error: Some(Arc::new(callback)),
        }
    }

    fn report(&self, err: &QueueError) {
        if let Some(callback) = &self.on_error {
            callback(err);
        }
    }
}

impl fmt::Debug for TaskCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCallbacks")
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Identifier returned by [`BackgroundTaskQueue::enqueue`].
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TaskId(String);

impl TaskId {
    fn generate() -> Self {
        Self(format!("task-{}", Uuid::new_v4()))
    }

    /// Borrows the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct Task {
    id: TaskId,
    kind: String,
    payload: Value,
    processor: Arc<dyn TaskProcessor>,
    callbacks: TaskCallbacks,
    policy: RetryPolicy,
}

/// In-process queue executing tasks on the tokio runtime.
#[derive(Clone, Default)]
pub struct BackgroundTaskQueue {
    processors: Arc<RwLock<HashMap<String, Arc<dyn TaskProcessor>>>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    draining: Arc<tokio::sync::Mutex<()>>,
}

impl BackgroundTaskQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the processor for `kind`, replacing any previous one.
    pub fn register(&self, kind: impl Into<String>, processor: Arc<dyn TaskProcessor>) {
        self.processors.write().insert(kind.into(), processor);
    }

    /// Starts a task in the background and returns its id.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::UnknownKind`] when no processor handles `kind`
    /// and [`QueueError::ShuttingDown`] once [`BackgroundTaskQueue::shutdown`]
    /// has been called.
    pub fn enqueue(
        &self,
        kind: &str,
        payload: Value,
        callbacks: TaskCallbacks,
        policy: RetryPolicy,
    ) -> Result<TaskId, QueueError> {
        if self.shutdown.is_cancelled() {
            return Err(QueueError::ShuttingDown);
        }
        let processor = self
            .processors
            .read()
            .get(kind)
            .cloned()
            .ok_or_else(|| QueueError::UnknownKind {
                kind: kind.to_owned(),
            })?;
        let task = Task {
            id: TaskId::generate(),
            kind: kind.to_owned(),
            payload,
            processor,
            callbacks,
            policy,
        };
        let id = task.id.clone();
        info!(task_id = %id, kind = %kind, "background task enqueued");
        self.tracker.spawn(run(task, self.shutdown.clone()));
        Ok(id)
    }

    /// Number of tasks still running or waiting to retry.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Waits until every task has finished while still accepting new ones.
    ///
    /// Tasks enqueued during the drain are waited for as well.
    pub async fn drain(&self) {
        let _guard = self.draining.lock().await;
        self.tracker.close();
        self.tracker.wait().await;
        if !self.shutdown.is_cancelled() {
            self.tracker.reopen();
        }
    }

    /// Stops accepting tasks, abandons pending retries, and waits for
    /// running attempts to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let _guard = self.draining.lock().await;
        self.tracker.close();
        self.tracker.wait().await;
        info!("background task queue stopped");
    }
}

impl fmt::Debug for BackgroundTaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundTaskQueue")
            .field("kinds", &self.processors.read().keys().cloned().collect::<Vec<_>>())
            .field("in_flight", &self.tracker.len())
            .finish_non_exhaustive()
    }
}

async fn run(task: Task, shutdown: CancellationToken) {
    let Task {
        id,
        kind,
        payload,
        processor,
        callbacks,
        policy,
    } = task;
    let mut retry = 0;
    loop {
        debug!(task_id = %id, kind = %kind, attempt = retry + 1, "processing background task");
        let Err(err) = processor.process(payload.clone()).await else {
            info!(task_id = %id, kind = %kind, "background task completed");
            return;
        };
        if retry >= policy.max_retries {
            error!(task_id = %id, kind = %kind, error = %err, "background task failed permanently");
            callbacks.report(&err);
            return;
        }
        let delay = policy.delay_for(retry);
        warn!(task_id = %id, kind = %kind, error = %err, ?delay, "background task failed; retrying");
        retry += 1;
        tokio::select! {
            () = shutdown.cancelled() => {
                warn!(task_id = %id, kind = %kind, "queue shutting down; abandoning retries");
                callbacks.report(&err);
                return;
            }
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// Payload of a [`DELETE_SERVER_TASK`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DeleteServerTask {
    /// Server to delete.
    pub server_id: ServerId,
}

/// Runs [`ServerLifecycle::delete_server`] for queued deletions.
///
/// A row that is already gone counts as done.
#[derive(Clone, Debug)]
pub struct DeleteServerProcessor {
    lifecycle: ServerLifecycle,
}

impl DeleteServerProcessor {
    /// Creates the processor.
    #[must_use]
    pub const fn new(lifecycle: ServerLifecycle) -> Self {
        Self { lifecycle }
    }
}

impl TaskProcessor for DeleteServerProcessor {
    fn process(&self, payload: Value) -> BoxFuture<'_, (), QueueError> {
        Box::pin(async move {
            let task: DeleteServerTask =
                serde_json::from_value(payload).map_err(|err| QueueError::InvalidPayload {
                    kind: String::from(DELETE_SERVER_TASK),
                    message: err.to_string(),
                })?;
            match self.lifecycle.delete_server(&task.server_id).await {
                Ok(()) | Err(LifecycleError::User(UserError::NotFound)) => Ok(()),
                Err(err) => Err(QueueError::Failed {
                    message: format!("deleting {}: {err}", task.server_id),
                }),
            }
        })
    }
}
