//! Settle-all execution for batches of independent operations.
//!
//! Batch jobs attempt every item even when some fail, then report the
//! failures together so the caller still knows exactly which items
//! succeeded.

use std::fmt::Display;
use std::future::Future;

use futures::future::join_all;
use thiserror::Error;

/// Failures collected from one batch.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{operation} failed: {}", .failures.join("; "))]
pub struct AggregateError {
    /// What the batch was doing.
    pub operation: String,
    /// Message of every failed item, in submission order.
    pub failures: Vec<String>,
}

impl AggregateError {
    /// Builds an error from `errors`, or `None` when there are none.
    #[must_use]
    pub fn from_errors<E, I>(operation: impl Into<String>, errors: I) -> Option<Self>
    where
        E: Display,
        I: IntoIterator<Item = E>,
    {
        let failures: Vec<String> = errors.into_iter().map(|err| err.to_string()).collect();
        if failures.is_empty() {
            return None;
        }
        Some(Self {
            operation: operation.into(),
            failures,
        })
    }

    /// Number of failed items.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.failures.len()
    }

    /// Always `false`; an aggregate is never built without failures.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of [`settle_all`].
#[derive(Debug)]
pub struct Settled<T, E> {
    /// Results of the successful items, in submission order.
    pub succeeded: Vec<T>,
    /// Errors of the failed items, in submission order.
    pub failed: Vec<E>,
}

impl<T, E: Display> Settled<T, E> {
    /// Converts the failures into an [`AggregateError`].
    ///
    /// # Errors
    ///
    /// Returns the aggregate when at least one item failed.
    pub fn into_result(self, operation: &str) -> Result<Vec<T>, AggregateError> {
        AggregateError::from_errors(operation, self.failed)
            .map_or(Ok(self.succeeded), Err)
    }
}

/// Runs every future concurrently and waits for all of them.
pub async fn settle_all<I, F, T, E>(operations: I) -> Settled<T, E>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    let mut settled = Settled {
        succeeded: Vec::new(),
        failed: Vec::new(),
    };
    for result in join_all(operations).await {
        match result {
            Ok(value) => settled.succeeded.push(value),
            Err(err) => settled.failed.push(err),
        }
    }
    settled
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[tokio::test]
    async fn every_operation_runs_even_when_some_fail() {
        let settled = settle_all((1..=4).map(|n| async move {
            if matches!(n, 2 | 4) {
                Err(format!("item {n} failed"))
            } else {
                Ok(n)
            }
        }))
        .await;

        assert_eq!(settled.succeeded, vec![1, 3]);
        let err = settled
            .into_result("batch")
            .expect_err("two items failed");
        assert_eq!(err.len(), 2);
        assert_eq!(err.to_string(), "batch failed: item 2 failed; item 4 failed");
    }

    #[rstest]
    fn no_errors_means_no_aggregate() {
        assert!(AggregateError::from_errors("batch", Vec::<String>::new()).is_none());
    }
}
