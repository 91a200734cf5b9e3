//! Cooperative cancellation for work units
//!
//! A unit of work receives a token when it starts and polls it at safe points
//! (loop heads, before and after blocking calls). Cancellation is a request,
//! never a preemption: the unit decides where to stop.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use thiserror::Error;

/// Outcome raised by a unit that observed cancellation.
///
/// Cancellation is expected and silent; callers propagate it with `?` and the
/// worker swallows it at the loop boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Cancellation token for cooperative cancellation
///
/// Clones share the same underlying flag, so cancelling any clone is observed
/// by all of them. Tokens are never reset: the worker swaps in a fresh token
/// for every unit instead, which keeps closures that captured an old token
/// permanently cancelled.
///
/// # Example
///
/// ```
/// use zonefit_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.check().is_err());
/// ```
#[derive(Clone, Debug)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a token that is already cancelled
    pub fn cancelled() -> Self {
        let token = Self::new();
        token.cancel();
        token
    }

    /// Cancel this token
    ///
    /// Idempotent. All clones observe the cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if this token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Return `Err(Cancelled)` if the token has been cancelled
    ///
    /// This is the form units use at their safe points:
    /// `token.check()?;`
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Whether two tokens share the same cancellation flag
    pub fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_token_basic() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert_eq!(token.check(), Ok(()));

        token.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.check(), Err(Cancelled));
    }

    #[test]
    fn test_cancellation_token_clone() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();

        token1.cancel();
        assert!(token2.is_cancelled());
        assert!(token1.same_as(&token2));
    }

    #[test]
    fn test_cancellation_token_idempotent() {
        let token = CancellationToken::new();

        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_fresh_tokens_are_independent() {
        let old = CancellationToken::new();
        let fresh = CancellationToken::new();

        old.cancel();
        assert!(!fresh.is_cancelled());
        assert!(!old.same_as(&fresh));
    }

    #[test]
    fn test_pre_cancelled_token() {
        assert!(CancellationToken::cancelled().is_cancelled());
        assert!(!CancellationToken::default().is_cancelled());
    }
}
