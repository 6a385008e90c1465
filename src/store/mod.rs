//! Contains the [Store] trait, composed of one interface per operation
//! supported on versioned [Record]s, together with their error types.
//!
//! Implementations in this crate:
//! * [InMemory], a thread-safe store backed by a [`std::collections::HashMap`],
//! * [Tracking], a decorator recording every committed update.
//!
//! A PostgreSQL implementation lives in the `optlock-postgres` crate.

use async_trait::async_trait;

use crate::pagination::{Page, Pagination};
use crate::record::Record;
use crate::version::{self, ConflictError};

pub mod inmemory;
pub mod tracking;

pub use self::inmemory::{Filter, InMemory};
pub use self::tracking::Tracking;

/// Error returned by a call to [Finder::find].
#[derive(Debug, thiserror::Error)]
pub enum FindError {
    /// The requested [Record] does not exist in the store.
    #[error("record was not found")]
    NotFound,

    /// Error returned when the [Finder] implementation has encountered an error.
    #[error("failed to find record, an error occurred: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Error returned by a call to [Creator::create].
#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    /// A [Record] with the same identifier already exists.
    #[error("record already exists")]
    AlreadyExists,

    /// Error returned when the [Creator] implementation has encountered an error.
    #[error("failed to create record, an error occurred: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Error returned by a call to [Updater::update].
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// The [Record] has been committed by someone else since it was read,
    /// or it has been deleted. Reading it again and retrying is safe.
    #[error("failed to update record: {0}")]
    Conflict(#[from] ConflictError),

    /// Error returned when the [Updater] implementation has encountered an error.
    #[error("failed to update record, an error occurred: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<UpdateError> for Option<ConflictError> {
    fn from(err: UpdateError) -> Self {
        match err {
            UpdateError::Conflict(v) => Some(v),
            UpdateError::Internal(_) => None,
        }
    }
}

/// Error returned by a call to [Deleter::delete].
#[derive(Debug, thiserror::Error)]
pub enum DeleteError {
    /// The [Record] to delete does not exist in the store.
    #[error("record was not found")]
    NotFound,

    /// The [Record] exists, but its [Version][version::Version] does not
    /// satisfy the [Check][version::Check] requested.
    #[error("failed to delete record: {0}")]
    Conflict(#[from] ConflictError),

    /// Error returned when the [Deleter] implementation has encountered an error.
    #[error("failed to delete record, an error occurred: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Error returned by the [Lister] methods.
#[derive(Debug, thiserror::Error)]
pub enum ListError {
    /// Error returned when the [Lister] implementation has encountered an error.
    #[error("failed to list records, an error occurred: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Interface used to load a single [Record] from the store.
#[async_trait]
pub trait Finder<Id, T>: Send + Sync
where
    Id: Send + Sync,
    T: Send + Sync,
{
    /// Returns the current persisted state of the [Record]
    /// identified by `id`.
    async fn find(&self, id: &Id) -> Result<Record<Id, T>, FindError>;
}

/// Interface used to persist new [Record]s.
#[async_trait]
pub trait Creator<Id, T>: Send + Sync
where
    Id: Send + Sync,
    T: Send + Sync,
{
    /// Persists a new [Record] with the given identifier and payload.
    ///
    /// The store assigns the [initial version][version::INITIAL] and the timestamps,
    /// and returns the persisted [Record].
    async fn create(&self, id: Id, payload: T) -> Result<Record<Id, T>, CreateError>;
}

/// Interface used to commit a new version of an existing [Record].
#[async_trait]
pub trait Updater<Id, T>: Send + Sync
where
    Id: Send + Sync,
    T: Send + Sync,
{
    /// Persists the payload of the [Record] only if the stored version is still
    /// the one carried by `record`: the check and the write happen atomically.
    ///
    /// On success the stored version is incremented by one, the update time is
    /// stamped, and both values are written back into `record`.
    ///
    /// On a version mismatch, [UpdateError::Conflict] is returned and neither
    /// the stored record nor `record` are modified.
    async fn update(&self, record: &mut Record<Id, T>) -> Result<(), UpdateError>;
}

/// Interface used to remove [Record]s from the store.
#[async_trait]
pub trait Deleter<Id>: Send + Sync
where
    Id: Send + Sync,
{
    /// Removes the [Record] identified by `id`.
    ///
    /// Use [version::Check::Any] to delete unconditionally, or
    /// [version::Check::MustBe] to delete only if nobody committed an update since
    /// the record was last read.
    ///
    /// Note that an unconditional delete can race with a concurrent
    /// [Mutator][crate::mutation::Mutator]: the mutator will then fail
    /// with a "not found" error instead of retrying.
    async fn delete(&self, id: &Id, check: version::Check) -> Result<(), DeleteError>;
}

/// Interface used to list [Record]s matching a filter.
#[async_trait]
pub trait Lister<Id, T>: Send + Sync
where
    Id: Send + Sync,
    T: Send + Sync,
{
    /// Filter criteria understood by the implementation.
    type Filter: Send + Sync;

    /// Returns the [Record]s matching `filter` in the page requested,
    /// ordered by creation.
    async fn list(
        &self,
        filter: &Self::Filter,
        pagination: Pagination,
    ) -> Result<Vec<Record<Id, T>>, ListError>;

    /// Returns the number of [Record]s matching `filter`, ignoring pagination.
    async fn count(&self, filter: &Self::Filter) -> Result<u64, ListError>;

    /// Returns both the requested page and the total count of matching [Record]s,
    /// read from the same snapshot of the store.
    async fn page(
        &self,
        filter: &Self::Filter,
        pagination: Pagination,
    ) -> Result<Page<Record<Id, T>>, ListError>;
}

/// A versioned [Record] store, supporting every operation in this module.
pub trait Store<Id, T>:
    Finder<Id, T> + Creator<Id, T> + Updater<Id, T> + Deleter<Id> + Lister<Id, T> + Send + Sync
where
    Id: Send + Sync,
    T: Send + Sync,
{
}

impl<S, Id, T> Store<Id, T> for S
where
    S: Finder<Id, T> + Creator<Id, T> + Updater<Id, T> + Deleter<Id> + Lister<Id, T> + Send + Sync,
    Id: Send + Sync,
    T: Send + Sync,
{
}

/// Extension trait that can be used to pull in supertypes implemented
/// in this module.
pub trait StoreExt<Id, T>: Store<Id, T> + Sized
where
    Id: Clone + Send + Sync,
    T: Clone + Send + Sync,
{
    /// Returns a [Tracking] instance that decorates the original [Store]
    /// instance this method has been called on.
    fn with_recorded_updates_tracking(self) -> Tracking<Self, Id, T> {
        Tracking::new(self)
    }
}

impl<S, Id, T> StoreExt<Id, T> for S
where
    S: Store<Id, T>,
    Id: Clone + Send + Sync,
    T: Clone + Send + Sync,
{
}
