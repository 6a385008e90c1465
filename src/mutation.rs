//! Module `mutation` contains the [Mutator], a retry driver that applies
//! a mutation to a versioned [Record] until it commits.
//!
//! ## How it works
//!
//! A [Mutator] performs a read-modify-write cycle without holding any lock:
//!
//! 1. the mutation function is applied to a private copy of the latest known
//!    [Record] payload,
//! 2. the copy is committed through [Updater::update], which only succeeds if
//!    nobody else committed in the meantime,
//! 3. on a version conflict, the [Record] is read again through [Finder::find]
//!    and the cycle starts over.
//!
//! Errors returned by the mutation function are never retried, as mutations
//! are expected to be pure functions of the payload.
//!
//! Retries are bounded and spaced out with an exponential backoff with full
//! jitter, as configured by the [RetryPolicy]. Long running mutations can be
//! interrupted from the outside with a [Cancellation] token.

use std::time::Duration;

use rand::Rng;

use crate::cancel::{Cancellation, Interrupted};
use crate::record::Record;
use crate::store::{FindError, Finder, UpdateError, Updater};
use crate::version::ConflictError;

/// Controls how many times, and how often, a [Mutator] retries
/// a mutation after a version conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: Option<u32>,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Default maximum number of commit attempts.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 16;

    /// Default delay used as a base for the exponential backoff.
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(2);

    /// Default upper bound of a single backoff delay.
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(250);

    /// Returns a [RetryPolicy] that retries forever, with no delay in between
    /// attempts.
    ///
    /// Under heavy contention on a single record this can starve
    /// some of the writers: prefer a bounded policy, or pair this with a
    /// [Cancellation] deadline.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Sets the maximum number of commit attempts, after which the [Mutator]
    /// gives up with [Error::RetryExhausted]. Zero means no limit.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = (max_attempts > 0).then_some(max_attempts);
        self
    }

    /// Sets the backoff parameters: before the n-th retry (starting from zero)
    /// the [Mutator] sleeps a random amount of time between zero and
    /// `min(base_delay * 2^n, max_delay)`.
    ///
    /// A zero `base_delay` disables the backoff entirely.
    #[must_use]
    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay.max(base_delay);
        self
    }

    /// Returns the maximum number of commit attempts, or [None] if unbounded.
    #[must_use]
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Returns true if another attempt can be made after `attempts` failed ones.
    #[must_use]
    pub fn allows_retry_after(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts < max)
    }

    /// Returns the upper bound of the delay to wait before the n-th retry,
    /// starting from zero.
    #[must_use]
    pub fn backoff_cap(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);

        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Samples the delay to wait before the n-th retry, starting from zero.
    fn delay_for(&self, retry: u32) -> Duration {
        let cap = self.backoff_cap(retry);

        if cap.is_zero() {
            return Duration::ZERO;
        }

        rand::thread_rng().gen_range(Duration::ZERO..=cap)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(Self::DEFAULT_MAX_ATTEMPTS),
            base_delay: Self::DEFAULT_BASE_DELAY,
            max_delay: Self::DEFAULT_MAX_DELAY,
        }
    }
}

/// Error returned by [Mutator::apply] and [Mutator::apply_with].
///
/// Version conflicts are never returned as such: they are retried
/// until the [RetryPolicy] gives up, in which case [Error::RetryExhausted]
/// is returned.
#[derive(Debug, thiserror::Error)]
pub enum Error<E> {
    /// The mutation function returned an error.
    #[error("mutation failed: {0}")]
    Mutation(#[source] E),

    /// The record does not exist anymore.
    #[error("record was not found")]
    NotFound,

    /// The mutation could not be committed within the maximum number
    /// of attempts allowed by the [RetryPolicy].
    #[error("failed to commit mutation after {attempts} attempts: {last_conflict}")]
    RetryExhausted {
        /// Number of commit attempts made.
        attempts: u32,
        /// The conflict that caused the last attempt to fail.
        #[source]
        last_conflict: ConflictError,
    },

    /// The mutation was interrupted through its [Cancellation] token.
    #[error("mutation interrupted: {0}")]
    Interrupted(#[from] Interrupted),

    /// The underlying store has encountered an error.
    #[error("failed to apply mutation, an error occurred: {0}")]
    Internal(#[source] anyhow::Error),
}

/// Applies mutations to versioned [Record]s persisted in a store,
/// using optimistic locking to avoid lost updates.
///
/// A [Mutator] holds no state other than its store and [RetryPolicy],
/// so it can be shared and used concurrently by any number of callers.
#[derive(Debug, Clone)]
pub struct Mutator<S> {
    store: S,
    policy: RetryPolicy,
}

impl<S> From<S> for Mutator<S> {
    fn from(store: S) -> Self {
        Self::new(store)
    }
}

impl<S> Mutator<S> {
    /// Creates a new [Mutator] over the given store,
    /// using the default [RetryPolicy].
    pub fn new(store: S) -> Self {
        Self {
            store,
            policy: RetryPolicy::default(),
        }
    }

    /// Replaces the [RetryPolicy] used by the [Mutator].
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the store used by the [Mutator].
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the [RetryPolicy] used by the [Mutator].
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Applies `mutate` to the payload of `record` and commits the result,
    /// re-reading the record and applying `mutate` again on every version conflict.
    ///
    /// `record` can be a stale snapshot. `mutate` can be called more than once,
    /// always on a fresh copy of the latest known payload.
    ///
    /// Returns the committed [Record].
    pub async fn apply<Id, T, E, F>(
        &self,
        record: Record<Id, T>,
        mutate: F,
    ) -> Result<Record<Id, T>, Error<E>>
    where
        S: Finder<Id, T> + Updater<Id, T>,
        Id: Clone + Send + Sync,
        T: Clone + Send + Sync,
        F: FnMut(&mut T) -> Result<(), E>,
    {
        self.apply_with(record, &Cancellation::default(), mutate)
            .await
    }

    /// Like [Mutator::apply], but stops retrying as soon as the [Cancellation]
    /// token is cancelled or its deadline passes.
    ///
    /// The token is checked before every store call and while waiting
    /// in between attempts.
    pub async fn apply_with<Id, T, E, F>(
        &self,
        record: Record<Id, T>,
        cancellation: &Cancellation,
        mut mutate: F,
    ) -> Result<Record<Id, T>, Error<E>>
    where
        S: Finder<Id, T> + Updater<Id, T>,
        Id: Clone + Send + Sync,
        T: Clone + Send + Sync,
        F: FnMut(&mut T) -> Result<(), E>,
    {
        let mut current = record;
        let mut attempts: u32 = 0;

        loop {
            let mut candidate = current.clone();
            mutate(&mut candidate.payload).map_err(Error::Mutation)?;

            cancellation.check()?;
            attempts = attempts.saturating_add(1);

            let conflict = match self.store.update(&mut candidate).await {
                Ok(()) => return Ok(candidate),
                Err(UpdateError::Conflict(conflict)) => conflict,
                Err(UpdateError::Internal(err)) => return Err(Error::Internal(err)),
            };

            if !self.policy.allows_retry_after(attempts) {
                tracing::warn!(
                    attempts,
                    expected = conflict.expected,
                    actual = ?conflict.actual,
                    "giving up on mutation, retry attempts exhausted"
                );

                return Err(Error::RetryExhausted {
                    attempts,
                    last_conflict: conflict,
                });
            }

            tracing::debug!(
                attempt = attempts,
                expected = conflict.expected,
                actual = ?conflict.actual,
                "version conflict detected, retrying mutation"
            );

            let delay = self.policy.delay_for(attempts - 1);

            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    reason = cancellation.interrupted() => return Err(reason.into()),
                    () = tokio::time::sleep(delay) => {},
                }
            }

            cancellation.check()?;

            current = match self.store.find(&current.id).await {
                Ok(latest) => latest,
                Err(FindError::NotFound) => return Err(Error::NotFound),
                Err(FindError::Internal(err)) => return Err(Error::Internal(err)),
            };
        }
    }
}
