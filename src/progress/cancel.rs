//! Cancel registry (spec.md component E).
//!
//! Holds one `CancellationToken` per running task, keyed by task id. A
//! cancel is idempotent: cancelling a task id that isn't registered (already
//! finished, or never existed) is a no-op, not an error — mirrors
//! `video_processor.py`'s `_register_proc`/`_unregister_proc` pairing, where
//! unregistering twice or cancelling after completion is expected traffic.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct CancelRegistry {
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

/// RAII guard returned by `register`; dropping it unregisters the token so
/// a task that finishes normally doesn't leak an entry.
pub struct CancelGuard<'a> {
    registry: &'a CancelRegistry,
    task_id: String,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        self.registry.tokens.lock().unwrap().remove(&self.task_id);
    }
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh token for `task_id`, returning it plus a guard that
    /// unregisters on drop. Replaces any stale entry under the same id.
    pub fn register(&self, task_id: impl Into<String>) -> (CancellationToken, CancelGuard<'_>) {
        let task_id = task_id.into();
        let token = CancellationToken::new();
        self.tokens.lock().unwrap().insert(task_id.clone(), token.clone());
        let guard = CancelGuard {
            registry: self,
            task_id,
        };
        (token, guard)
    }

    /// Registers a token without an RAII guard. Callers that manage their
    /// own task lifecycle (e.g. the scheduler, which already unregisters in
    /// its worker cleanup path) use this instead of `register`.
    pub fn register_token(&self, task_id: impl Into<String>) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.lock().unwrap().insert(task_id.into(), token.clone());
        token
    }

    /// Returns the live token for a task, if one is registered, without
    /// creating or replacing it — used by callers that must observe a
    /// cancellation requested before they start watching for it.
    pub fn token_for(&self, task_id: &str) -> Option<CancellationToken> {
        self.tokens.lock().unwrap().get(task_id).cloned()
    }

    pub fn unregister(&self, task_id: &str) {
        self.tokens.lock().unwrap().remove(task_id);
    }

    /// Cancels a task if it is currently registered. Returns `true` if a
    /// live token was found and cancelled.
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.tokens.lock().unwrap().get(task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, task_id: &str) -> bool {
        self.tokens.lock().unwrap().contains_key(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent_and_tolerant_of_unknown_ids() {
        let registry = CancelRegistry::new();
        assert!(!registry.cancel("missing"));
        let (token, _guard) = registry.register("t1");
        assert!(registry.cancel("t1"));
        assert!(token.is_cancelled());
        assert!(registry.cancel("t1"));
    }

    #[test]
    fn guard_drop_unregisters() {
        let registry = CancelRegistry::new();
        {
            let (_token, _guard) = registry.register("t1");
            assert!(registry.is_registered("t1"));
        }
        assert!(!registry.is_registered("t1"));
    }
}
