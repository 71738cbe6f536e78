//! Per-server cancellation tokens shared by deploy and delete workflows.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::ServerId;

/// Registry of cancellation tokens keyed by server id.
///
/// A deployment fetches its token once before its first step and hands it
/// to every wait; a deletion cancels it so that any in-flight deployment of
/// the same server stops at its next check.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<ServerId, CancellationToken>>,
}

impl CancellationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the token for `server_id`, creating it on first use.
    ///
    /// Concurrent callers for the same id receive clones of the same token.
    #[must_use]
    pub fn get_or_create(&self, server_id: &ServerId) -> CancellationToken {
        self.tokens
            .lock()
            .entry(server_id.clone())
            .or_default()
            .clone()
    }

    /// Drops the registry's reference without cancelling the token.
    pub fn delete(&self, server_id: &ServerId) {
        if self.tokens.lock().remove(server_id).is_some() {
            debug!(server_id = %server_id, "released cancellation token");
        }
    }

    /// Cancels the token for `server_id`, if any, and removes it.
    ///
    /// Returns whether a token was present.
    #[must_use = "false means no deployment was in flight"]
    pub fn cancel(&self, server_id: &ServerId) -> bool {
        let removed = self.tokens.lock().remove(server_id);
        removed.is_some_and(|token| {
            token.cancel();
            debug!(server_id = %server_id, "cancelled in-flight deployment");
            true
        })
    }

    /// Number of tracked tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    /// Whether no tokens are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn registry() -> CancellationRegistry {
        CancellationRegistry::new()
    }

    #[rstest]
    fn repeated_lookups_share_one_token(registry: CancellationRegistry) {
        let id = ServerId::from("server-a");
        let first = registry.get_or_create(&id);
        let second = registry.get_or_create(&id);
        first.cancel();
        assert!(second.is_cancelled());
        assert_eq!(registry.len(), 1);
    }

    #[rstest]
    fn delete_leaves_token_uncancelled(registry: CancellationRegistry) {
        let id = ServerId::from("server-a");
        let token = registry.get_or_create(&id);
        registry.delete(&id);
        assert!(!token.is_cancelled());
        assert!(registry.is_empty());

        let fresh = registry.get_or_create(&id);
        token.cancel();
        assert!(!fresh.is_cancelled());
    }

    #[rstest]
    fn cancel_fires_and_removes(registry: CancellationRegistry) {
        let id = ServerId::from("server-a");
        let token = registry.get_or_create(&id);
        assert!(registry.cancel(&id));
        assert!(token.is_cancelled());
        assert!(registry.is_empty());
        assert!(!registry.cancel(&id));
    }

    #[rstest]
    fn concurrent_callers_observe_the_same_token(registry: CancellationRegistry) {
        let shared_registry = Arc::new(registry);
        let id = ServerId::from("server-b");
        let tokens: Vec<CancellationToken> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let shared = Arc::clone(&shared_registry);
                    let key = id.clone();
                    scope.spawn(move || shared.get_or_create(&key))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("thread should not panic"))
                .collect()
        });

        assert!(shared_registry.cancel(&id));
        assert!(tokens.iter().all(CancellationToken::is_cancelled));
    }
}
