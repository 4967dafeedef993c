//! Cooperative cancellation
//!
//! A cheap, cloneable signal shared between the caller of a long-running
//! operation (tree build, price refresh, optimization) and the operation
//! itself. Network awaits race the token with `tokio::select!`.

use crate::error::{AppError, Result};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cancellation signal for long-running operations
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(AppError::Cancelled)` once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(AppError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when cancellation is requested
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
            if self.is_cancelled() {
                return;
            }
        }
    }

    /// Run `fut` until it completes or the token is cancelled
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(AppError::Cancelled),
            out = fut => out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_returns_cancelled_when_token_fires() {
        let token = CancelToken::new();
        let trigger = token.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result: Result<()> = token
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(AppError::Cancelled)));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_passes_through_result() {
        let token = CancelToken::new();
        let value = token.run(async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);
        assert!(token.check().is_ok());
    }

    #[tokio::test]
    async fn test_already_cancelled_short_circuits() {
        let token = CancelToken::new();
        token.cancel();
        token.cancel();
        let result = token.run(async { Ok(1) }).await;
        assert!(matches!(result, Err(AppError::Cancelled)));
    }
}
