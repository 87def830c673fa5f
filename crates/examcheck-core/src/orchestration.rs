//! Cancellation and shared limits threaded through batch, run and machine
//! calls.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Explicit orchestration context. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct Orchestration {
    cancel: CancellationToken,
    poll_limiter: Arc<Semaphore>,
}

impl Default for Orchestration {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestration {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            poll_limiter: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once [`Orchestration::cancel`] was called on any clone.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Serializes monitor polls across all machines of a batch.
    pub fn poll_limiter(&self) -> Arc<Semaphore> {
        Arc::clone(&self.poll_limiter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_share_cancellation() {
        let o = Orchestration::new();
        let clone = o.clone();
        assert!(!clone.is_cancelled());
        o.cancel();
        assert!(clone.is_cancelled());
        clone.cancelled().await;
    }

    #[test]
    fn poll_limiter_is_shared_and_single() {
        let o = Orchestration::new();
        let a = o.poll_limiter();
        let b = o.clone().poll_limiter();
        let _permit = a.try_acquire().unwrap();
        assert!(b.try_acquire().is_err());
    }
}
