//! Contains the [InMemory] implementation of the [Store][super::Store] trait,
//! backed by a thread-safe [`std::collections::HashMap`].

use std::collections::HashMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::clock::{self, Clock, SystemClock};
use crate::pagination::{Page, Pagination};
use crate::record::Record;
use crate::store::{
    CreateError, DeleteError, FindError, Finder, ListError, Lister, UpdateError, Updater,
};
use crate::store::{Creator, Deleter};
use crate::version::{self, ConflictError};

/// Predicate used by [InMemory] to select [Record]s in [Lister] calls.
pub struct Filter<Id, T>(Option<Arc<dyn Fn(&Record<Id, T>) -> bool + Send + Sync>>);

impl<Id, T> Filter<Id, T> {
    /// Selects all the [Record]s in the store.
    #[must_use]
    pub fn all() -> Self {
        Self(None)
    }

    /// Selects only the [Record]s for which `predicate` returns true.
    pub fn matching<F>(predicate: F) -> Self
    where
        F: Fn(&Record<Id, T>) -> bool + Send + Sync + 'static,
    {
        Self(Some(Arc::new(predicate)))
    }

    fn matches(&self, record: &Record<Id, T>) -> bool {
        self.0.as_ref().map_or(true, |predicate| predicate(record))
    }
}

impl<Id, T> Default for Filter<Id, T> {
    fn default() -> Self {
        Self::all()
    }
}

impl<Id, T> Clone for Filter<Id, T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<Id, T> Debug for Filter<Id, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.0 {
            None => f.write_str("Filter::All"),
            Some(_) => f.write_str("Filter::Matching"),
        }
    }
}

#[derive(Debug)]
struct Entry<Id, T> {
    // Insertion order, used to list records in a stable order.
    seq: u64,
    record: Record<Id, T>,
}

#[derive(Debug)]
struct InMemoryBackend<Id, T> {
    records: HashMap<Id, Entry<Id, T>>,
    next_seq: u64,
}

impl<Id, T> Default for InMemoryBackend<Id, T> {
    fn default() -> Self {
        Self {
            records: HashMap::default(),
            next_seq: 0,
        }
    }
}

impl<Id, T> InMemoryBackend<Id, T>
where
    Id: Clone,
    T: Clone,
{
    fn select(&self, filter: &Filter<Id, T>) -> Vec<&Entry<Id, T>> {
        let mut entries: Vec<_> = self
            .records
            .values()
            .filter(|entry| filter.matches(&entry.record))
            .collect();

        entries.sort_by_key(|entry| entry.seq);
        entries
    }

    fn list(&self, filter: &Filter<Id, T>, pagination: Pagination) -> Vec<Record<Id, T>> {
        let offset = usize::try_from(pagination.offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(pagination.limit()).unwrap_or(usize::MAX);

        self.select(filter)
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|entry| entry.record.clone())
            .collect()
    }

    fn count(&self, filter: &Filter<Id, T>) -> u64 {
        self.records
            .values()
            .filter(|entry| filter.matches(&entry.record))
            .count() as u64
    }
}

/// In-memory implementation of the [Store][super::Store] trait,
/// backed by a thread-safe [`std::collections::HashMap`].
///
/// Cloned instances share the same data. Timestamps are read
/// from the [Clock] provided, the system clock by default.
#[derive(Clone)]
pub struct InMemory<Id, T, C = SystemClock> {
    backend: Arc<RwLock<InMemoryBackend<Id, T>>>,
    clock: C,
}

impl<Id, T> Default for InMemory<Id, T, SystemClock> {
    fn default() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<Id, T, C> InMemory<Id, T, C> {
    /// Creates a new, empty [InMemory] store stamping records
    /// with the specified [Clock].
    pub fn with_clock(clock: C) -> Self {
        Self {
            backend: Arc::default(),
            clock,
        }
    }

    /// Returns the number of [Record]s currently in the store.
    pub fn len(&self) -> usize {
        self.backend.read().records.len()
    }

    /// Returns true if the store contains no [Record]s.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<Id, T, C> Debug for InMemory<Id, T, C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("InMemory")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<Id, T, C> Finder<Id, T> for InMemory<Id, T, C>
where
    Id: Clone + Eq + Hash + Send + Sync,
    T: Clone + Send + Sync,
    C: Clock,
{
    async fn find(&self, id: &Id) -> Result<Record<Id, T>, FindError> {
        self.backend
            .read()
            .records
            .get(id)
            .map(|entry| entry.record.clone())
            .ok_or(FindError::NotFound)
    }
}

#[async_trait]
impl<Id, T, C> Creator<Id, T> for InMemory<Id, T, C>
where
    Id: Clone + Eq + Hash + Send + Sync,
    T: Clone + Send + Sync,
    C: Clock,
{
    async fn create(&self, id: Id, payload: T) -> Result<Record<Id, T>, CreateError> {
        let mut backend = self.backend.write();

        if backend.records.contains_key(&id) {
            return Err(CreateError::AlreadyExists);
        }

        let now = self.clock.now();
        let record = Record {
            id: id.clone(),
            version: version::INITIAL,
            created_at: now,
            updated_at: now,
            payload,
        };

        let seq = backend.next_seq;
        backend.next_seq += 1;
        backend.records.insert(
            id,
            Entry {
                seq,
                record: record.clone(),
            },
        );

        Ok(record)
    }
}

#[async_trait]
impl<Id, T, C> Updater<Id, T> for InMemory<Id, T, C>
where
    Id: Clone + Eq + Hash + Send + Sync,
    T: Clone + Send + Sync,
    C: Clock,
{
    async fn update(&self, record: &mut Record<Id, T>) -> Result<(), UpdateError> {
        let mut backend = self.backend.write();

        let Some(entry) = backend.records.get_mut(&record.id) else {
            return Err(UpdateError::Conflict(ConflictError {
                expected: record.version,
                actual: None,
            }));
        };

        let stored = &mut entry.record;

        if stored.version != record.version {
            return Err(UpdateError::Conflict(ConflictError {
                expected: record.version,
                actual: Some(stored.version),
            }));
        }

        stored.version += 1;
        stored.updated_at = clock::next_update_time(&self.clock, stored.updated_at);
        stored.payload = record.payload.clone();

        record.version = stored.version;
        record.updated_at = stored.updated_at;

        Ok(())
    }
}

#[async_trait]
impl<Id, T, C> Deleter<Id> for InMemory<Id, T, C>
where
    Id: Clone + Eq + Hash + Send + Sync,
    T: Clone + Send + Sync,
    C: Clock,
{
    async fn delete(&self, id: &Id, check: version::Check) -> Result<(), DeleteError> {
        let mut backend = self.backend.write();

        let current = backend
            .records
            .get(id)
            .map(|entry| entry.record.version)
            .ok_or(DeleteError::NotFound)?;

        if !check.is_satisfied_by(current) {
            if let version::Check::MustBe(expected) = check {
                return Err(DeleteError::Conflict(ConflictError {
                    expected,
                    actual: Some(current),
                }));
            }
        }

        backend.records.remove(id);

        Ok(())
    }
}

#[async_trait]
impl<Id, T, C> Lister<Id, T> for InMemory<Id, T, C>
where
    Id: Clone + Eq + Hash + Send + Sync,
    T: Clone + Send + Sync,
    C: Clock,
{
    type Filter = Filter<Id, T>;

    async fn list(
        &self,
        filter: &Self::Filter,
        pagination: Pagination,
    ) -> Result<Vec<Record<Id, T>>, ListError> {
        Ok(self.backend.read().list(filter, pagination))
    }

    async fn count(&self, filter: &Self::Filter) -> Result<u64, ListError> {
        Ok(self.backend.read().count(filter))
    }

    async fn page(
        &self,
        filter: &Self::Filter,
        pagination: Pagination,
    ) -> Result<Page<Record<Id, T>>, ListError> {
        let backend = self.backend.read();

        Ok(Page {
            items: backend.list(filter, pagination),
            total: backend.count(filter),
            pagination,
        })
    }
}
