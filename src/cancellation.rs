/**
 * Cancellation
 * Cooperative cancellation signal threaded through pipeline stages, the
 * indexing orchestrator, and retrieval primitives (spec.md §5, §7, P-10).
 * A plain `Arc<AtomicBool>` wrapper, following the stop/closed-flag pattern
 * used for cooperative shutdown elsewhere in the pack.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{DircError, DircResult};

#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(DircError::CancelledError)` if cancellation was requested, `Ok(())` otherwise.
    pub fn check(&self) -> DircResult<()> {
        if self.is_cancelled() {
            Err(DircError::CancelledError)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
    }

    #[test]
    fn cancel_trips_the_check() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(DircError::CancelledError)));
    }

    #[test]
    fn clones_share_the_same_flag() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
