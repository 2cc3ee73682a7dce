//! Bounded, cancellable retry loop
//!
//! A [`Retry`] runs an operation until it succeeds or the timeout elapses,
//! sleeping a fixed interval between attempts. The only suspension point is
//! that sleep, and it races the session's [`CancelToken`] so teardown never
//! waits out a full lookup window.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Session-wide cancellation signal
#[derive(Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives as long as any token clone, so this only errors
        // after everyone holding the token is gone.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a retry loop gave up
#[derive(Debug, PartialEq)]
pub enum RetryError<E> {
    /// Timed out (or hit a non-retryable failure); carries the last failure
    Exhausted { last: E, attempts: u32 },
    /// The owning session was cancelled mid-loop
    Cancelled { last: Option<E> },
}

/// Retry-with-interval policy
#[derive(Debug, Clone, Copy)]
pub struct Retry {
    interval: Duration,
    timeout: Duration,
}

impl Retry {
    /// Intervals are clamped to at least 1ms so a zero interval can't spin
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            timeout,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Retry on every failure
    pub async fn run<T, E, F, Fut>(&self, cancel: &CancelToken, op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_while(cancel, op, |_| true).await
    }

    /// Retry while `retryable` accepts the failure
    ///
    /// At least one attempt is always made. After a failure the loop sleeps
    /// `min(interval, time left)`, so the loop never starts an attempt after
    /// the timeout has passed.
    pub async fn run_while<T, E, F, Fut, P>(
        &self,
        cancel: &CancelToken,
        mut op: F,
        retryable: P,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let start = Instant::now();
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled { last: None });
            }

            attempts += 1;
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let elapsed = start.elapsed();
            if !retryable(&err) || elapsed >= self.timeout {
                return Err(RetryError::Exhausted {
                    last: err,
                    attempts,
                });
            }

            let pause = self.interval.min(self.timeout - elapsed);
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled { last: Some(err) });
                }
            }
        }
    }
}
