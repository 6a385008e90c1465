//! Cancellation and deadline support for long-running store operations,
//! such as the retry loop of a [Mutator][crate::mutation::Mutator].

use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

/// Reason for which an operation was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    /// [Cancellation::cancel] has been called.
    #[error("operation was cancelled")]
    Cancelled,

    /// The deadline of the [Cancellation] has passed.
    #[error("operation deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A token that can be used to interrupt an operation from the outside,
/// optionally carrying a deadline after which the operation gives up on its own.
///
/// Cloned tokens share the cancellation state: cancelling one cancels all of them.
/// The default token is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    inner: Arc<Inner>,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// Creates a new token, with no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a deadline on the token.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets a deadline on the token, `timeout` from now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Returns the deadline of the token, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancels the token, and every clone of it.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Returns true if [Cancellation::cancel] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Returns an error if the token has been cancelled
    /// or its deadline has passed.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }

        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Interrupted::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Completes when the token gets cancelled.
    pub async fn cancelled(&self) {
        loop {
            let mut notified = pin!(self.inner.notify.notified());

            // Register for notifications before checking the flag,
            // or a concurrent cancel could be missed.
            notified.as_mut().enable();

            if self.is_cancelled() {
                return;
            }

            notified.await;
        }
    }

    /// Completes when the token gets cancelled or its deadline passes,
    /// returning the reason. Never completes for the default token.
    pub async fn interrupted(&self) -> Interrupted {
        match self.deadline {
            None => {
                self.cancelled().await;
                Interrupted::Cancelled
            },
            Some(deadline) => {
                tokio::select! {
                    biased;
                    () = self.cancelled() => Interrupted::Cancelled,
                    () = tokio::time::sleep_until(deadline) => Interrupted::DeadlineExceeded,
                }
            },
        }
    }
}
