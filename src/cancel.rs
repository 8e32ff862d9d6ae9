//! Cancellation for in-flight invocations
//!
//! A [`CancelToken`] is threaded through every asynchronous step of an
//! invocation. Cancelling it makes the pending step resolve with
//! [`Cancelled`]; a running subprocess is asked to stop, but the token does
//! not wait for it to actually exit.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

/// The operation was cancelled through its [`CancelToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Cloneable cancellation signal. All clones observe the same state.
#[derive(Debug, Clone)]
pub struct CancelToken {
    state: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { state: Arc::new(tx) }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.state.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so this only returns once the flag is set.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Fail fast if already cancelled.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run `fut` unless the token fires first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Cancelled> {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Cancelled),
            out = fut => Ok(out),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        assert_eq!(clone.check(), Err(Cancelled));
    }

    #[tokio::test]
    async fn test_run_completes_when_not_cancelled() {
        let token = CancelToken::new();
        let out = token.run(async { 42 }).await;
        assert_eq!(out, Ok(42));
    }

    #[tokio::test]
    async fn test_run_resolves_on_cancel() {
        let token = CancelToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let out = token
            .run(tokio::time::sleep(Duration::from_secs(30)))
            .await;
        assert_eq!(out, Err(Cancelled));
    }

    #[tokio::test]
    async fn test_run_refuses_when_already_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        assert_eq!(token.run(async { 1 }).await, Err(Cancelled));
    }
}
