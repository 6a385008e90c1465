//! Module containing some extension traits to support code instrumentation
//! using the `tracing` crate.

use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use tracing::instrument;

use crate::pagination::{Page, Pagination};
use crate::record::Record;
use crate::store::{
    CreateError, Creator, DeleteError, Deleter, FindError, Finder, ListError, Lister, Store,
    UpdateError, Updater,
};
use crate::version;

/// [`Store`] type wrapper that provides instrumentation
/// features through the `tracing` crate.
#[derive(Debug, Clone)]
pub struct InstrumentedStore<S, Id, T>
where
    S: Store<Id, T>,
    Id: Debug + Send + Sync,
    T: Debug + Send + Sync,
{
    store: S,
    id: PhantomData<Id>,
    t: PhantomData<T>,
}

#[async_trait]
impl<S, Id, T> Finder<Id, T> for InstrumentedStore<S, Id, T>
where
    S: Store<Id, T>,
    Id: Debug + Send + Sync,
    T: Debug + Send + Sync,
{
    #[allow(clippy::blocks_in_conditions)] // NOTE: seems to be a false positive.
    #[instrument(name = "store::Finder.find", err, skip(self))]
    async fn find(&self, id: &Id) -> Result<Record<Id, T>, FindError> {
        self.store.find(id).await
    }
}

#[async_trait]
impl<S, Id, T> Creator<Id, T> for InstrumentedStore<S, Id, T>
where
    S: Store<Id, T>,
    Id: Debug + Send + Sync,
    T: Debug + Send + Sync,
{
    #[allow(clippy::blocks_in_conditions)] // NOTE: seems to be a false positive.
    #[instrument(name = "store::Creator.create", ret, err, skip(self))]
    async fn create(&self, id: Id, payload: T) -> Result<Record<Id, T>, CreateError> {
        self.store.create(id, payload).await
    }
}

#[async_trait]
impl<S, Id, T> Updater<Id, T> for InstrumentedStore<S, Id, T>
where
    S: Store<Id, T>,
    Id: Debug + Send + Sync,
    T: Debug + Send + Sync,
{
    #[allow(clippy::blocks_in_conditions)] // NOTE: seems to be a false positive.
    #[instrument(
        name = "store::Updater.update",
        err,
        skip(self, record),
        fields(id = ?record.id, expected_version = record.version)
    )]
    async fn update(&self, record: &mut Record<Id, T>) -> Result<(), UpdateError> {
        self.store.update(record).await
    }
}

#[async_trait]
impl<S, Id, T> Deleter<Id> for InstrumentedStore<S, Id, T>
where
    S: Store<Id, T>,
    Id: Debug + Send + Sync,
    T: Debug + Send + Sync,
{
    #[allow(clippy::blocks_in_conditions)] // NOTE: seems to be a false positive.
    #[instrument(name = "store::Deleter.delete", err, skip(self))]
    async fn delete(&self, id: &Id, check: version::Check) -> Result<(), DeleteError> {
        self.store.delete(id, check).await
    }
}

#[async_trait]
impl<S, Id, T> Lister<Id, T> for InstrumentedStore<S, Id, T>
where
    S: Store<Id, T>,
    Id: Debug + Send + Sync,
    T: Debug + Send + Sync,
{
    type Filter = <S as Lister<Id, T>>::Filter;

    #[allow(clippy::blocks_in_conditions)] // NOTE: seems to be a false positive.
    #[instrument(name = "store::Lister.list", err, skip(self, filter))]
    async fn list(
        &self,
        filter: &Self::Filter,
        pagination: Pagination,
    ) -> Result<Vec<Record<Id, T>>, ListError> {
        self.store.list(filter, pagination).await
    }

    #[allow(clippy::blocks_in_conditions)] // NOTE: seems to be a false positive.
    #[instrument(name = "store::Lister.count", ret, err, skip(self, filter))]
    async fn count(&self, filter: &Self::Filter) -> Result<u64, ListError> {
        self.store.count(filter).await
    }

    #[allow(clippy::blocks_in_conditions)] // NOTE: seems to be a false positive.
    #[instrument(name = "store::Lister.page", err, skip(self, filter))]
    async fn page(
        &self,
        filter: &Self::Filter,
        pagination: Pagination,
    ) -> Result<Page<Record<Id, T>>, ListError> {
        self.store.page(filter, pagination).await
    }
}

/// Extension trait for any [`Store`] type to provide
/// instrumentation features through the `tracing` crate.
pub trait StoreExt<Id, T>: Store<Id, T> + Sized
where
    Id: Debug + Send + Sync,
    T: Debug + Send + Sync,
{
    /// Returns an instrumented version of the [`Store`] instance.
    fn with_tracing(self) -> InstrumentedStore<Self, Id, T> {
        InstrumentedStore {
            store: self,
            id: PhantomData,
            t: PhantomData,
        }
    }
}

impl<S, Id, T> StoreExt<Id, T> for S
where
    S: Store<Id, T>,
    Id: Debug + Send + Sync,
    T: Debug + Send + Sync,
{
}
