//! Process-wide shutdown coordination, independent of any one bucket's
//! own start/stop state machine (see `task_triggering::lifecycle` for that).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Handed to every long-running task spawned by the process (one per
/// bucket worker, plus the HTTP health/metrics server). Cloning is cheap;
/// all clones share the same cancellation token.
#[derive(Clone)]
pub struct ShutdownHandle {
    inner: Arc<CancellationToken>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellationToken::new()),
        }
    }

    /// Future that resolves once [`Self::shut_down`] has been called
    /// anywhere. Pair with `tokio::select!` to interrupt a blocking
    /// operation such as `consumer.recv()`.
    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.inner.cancelled()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Begin process shutdown. Idempotent.
    pub fn shut_down(&self) {
        self.inner.cancel();
    }

    /// A token usable anywhere a `tokio_util::sync::CancellationToken` is
    /// expected, e.g. as a child token for a bucket-scoped consumer.
    pub fn token(&self) -> CancellationToken {
        (*self.inner).clone()
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_future_resolves_after_shut_down() {
        let handle = ShutdownHandle::new();
        assert!(!handle.is_shutting_down());

        let waiter = handle.clone();
        let task = tokio::spawn(async move {
            waiter.cancelled().await;
        });

        handle.shut_down();
        task.await.unwrap();
        assert!(handle.is_shutting_down());
    }

    #[tokio::test]
    async fn shut_down_is_idempotent() {
        let handle = ShutdownHandle::new();
        handle.shut_down();
        handle.shut_down();
        assert!(handle.is_shutting_down());
    }
}
