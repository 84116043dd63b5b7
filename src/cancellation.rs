//! Cooperative cancellation for in-flight rewrites.
//!
//! A [`CancellationSource`] owns the right to cancel; any number of
//! [`CancellationToken`] clones observe it, either by polling
//! [`is_cancelled`](CancellationToken::is_cancelled) or by awaiting
//! [`cancelled`](CancellationToken::cancelled) inside a `tokio::select!`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Default)]
struct CancellationInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Observer side. Cheap to clone.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<CancellationInner>,
}

/// Control side. Dropping the source does not cancel its tokens.
#[derive(Default)]
pub struct CancellationSource {
    inner: Arc<CancellationInner>,
}

impl CancellationSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Cancel every token handed out by this source. Idempotent.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }
}

impl CancellationToken {
    /// A token that is never cancelled, for callers with nothing to abort.
    pub fn never() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once the source cancels. Resolves immediately if it already has.
    pub async fn cancelled(&self) {
        // The Notified future is registered on creation, so a cancel racing
        // with the flag check below still wakes it.
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_is_visible_to_all_tokens() {
        let source = CancellationSource::new();
        let a = source.token();
        let b = a.clone();

        assert!(!a.is_cancelled());
        source.cancel();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert!(source.is_cancelled());

        // Second cancel is harmless
        source.cancel();
        assert!(b.is_cancelled());
    }

    #[test]
    fn test_never_token() {
        assert!(!CancellationToken::never().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let source = CancellationSource::new();
        let token = source.token();

        let waiter = tokio::spawn(async move {
            token.cancelled().await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        source.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish after cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_cancelled() {
        let source = CancellationSource::new();
        source.cancel();

        tokio::time::timeout(Duration::from_millis(100), source.token().cancelled())
            .await
            .expect("already-cancelled token should resolve at once");
    }
}
