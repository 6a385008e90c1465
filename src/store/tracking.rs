//! Contains the [Tracking] decorator type for [Store] implementations.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::pagination::{Page, Pagination};
use crate::record::Record;
use crate::store::{
    CreateError, Creator, DeleteError, Deleter, FindError, Finder, ListError, Lister, Store,
    UpdateError, Updater,
};
use crate::version;

/// Decorator type for a [Store] implementation that tracks the list of
/// [Record] versions committed through it.
///
/// Useful for testing purposes, i.e. asserting that every committed update
/// produced exactly the next version of a record.
#[derive(Debug, Clone)]
pub struct Tracking<S, Id, T>
where
    S: Store<Id, T>,
    Id: Send + Sync,
    T: Send + Sync,
{
    store: S,
    updates: Arc<RwLock<Vec<Record<Id, T>>>>,
}

impl<S, Id, T> Tracking<S, Id, T>
where
    S: Store<Id, T>,
    Id: Clone + Send + Sync,
    T: Clone + Send + Sync,
{
    pub(crate) fn new(store: S) -> Self {
        Self {
            store,
            updates: Arc::default(),
        }
    }

    /// Returns the list of [Record]s committed through this decorator so far,
    /// as they were right after their update.
    pub fn recorded_updates(&self) -> Vec<Record<Id, T>> {
        self.updates.read().clone()
    }

    /// Resets the list of recorded updates.
    pub fn reset_recorded_updates(&self) {
        self.updates.write().clear();
    }
}

#[async_trait]
impl<S, Id, T> Finder<Id, T> for Tracking<S, Id, T>
where
    S: Store<Id, T>,
    Id: Clone + Send + Sync,
    T: Clone + Send + Sync,
{
    async fn find(&self, id: &Id) -> Result<Record<Id, T>, FindError> {
        self.store.find(id).await
    }
}

#[async_trait]
impl<S, Id, T> Creator<Id, T> for Tracking<S, Id, T>
where
    S: Store<Id, T>,
    Id: Clone + Send + Sync,
    T: Clone + Send + Sync,
{
    async fn create(&self, id: Id, payload: T) -> Result<Record<Id, T>, CreateError> {
        self.store.create(id, payload).await
    }
}

#[async_trait]
impl<S, Id, T> Updater<Id, T> for Tracking<S, Id, T>
where
    S: Store<Id, T>,
    Id: Clone + Send + Sync,
    T: Clone + Send + Sync,
{
    async fn update(&self, record: &mut Record<Id, T>) -> Result<(), UpdateError> {
        // Recording happens after the commit, so concurrent updates may be
        // recorded in a different order than the one they were committed in.
        self.store.update(record).await?;
        self.updates.write().push(record.clone());

        Ok(())
    }
}

#[async_trait]
impl<S, Id, T> Deleter<Id> for Tracking<S, Id, T>
where
    S: Store<Id, T>,
    Id: Clone + Send + Sync,
    T: Clone + Send + Sync,
{
    async fn delete(&self, id: &Id, check: version::Check) -> Result<(), DeleteError> {
        self.store.delete(id, check).await
    }
}

#[async_trait]
impl<S, Id, T> Lister<Id, T> for Tracking<S, Id, T>
where
    S: Store<Id, T>,
    Id: Clone + Send + Sync,
    T: Clone + Send + Sync,
{
    type Filter = <S as Lister<Id, T>>::Filter;

    async fn list(
        &self,
        filter: &Self::Filter,
        pagination: Pagination,
    ) -> Result<Vec<Record<Id, T>>, ListError> {
        self.store.list(filter, pagination).await
    }

    async fn count(&self, filter: &Self::Filter) -> Result<u64, ListError> {
        self.store.count(filter).await
    }

    async fn page(
        &self,
        filter: &Self::Filter,
        pagination: Pagination,
    ) -> Result<Page<Record<Id, T>>, ListError> {
        self.store.page(filter, pagination).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::{InMemory, StoreExt};

    #[tokio::test]
    async fn tracking_store_records_committed_updates_only() {
        let store = InMemory::<&'static str, u32>::default().with_recorded_updates_tracking();

        let mut record = store.create("counter", 0).await.unwrap();
        let stale = record.clone();

        record.payload = 1;
        store.update(&mut record).await.unwrap();

        let mut stale = stale;
        stale.payload = 2;
        store
            .update(&mut stale)
            .await
            .expect_err("stale update should fail");

        let updates = store.recorded_updates();
        assert_eq!(vec![record], updates);

        store.reset_recorded_updates();
        assert!(store.recorded_updates().is_empty());
    }
}
