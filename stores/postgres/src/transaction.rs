//! Ambient transactions spanning multiple store operations.

use std::convert::Infallible;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use optlock::clock::Clock;
use optlock::pagination::{Page, Pagination};
use optlock::record::Record;
use optlock::store::{
    CreateError, Creator, DeleteError, Deleter, FindError, Finder, ListError, Lister, UpdateError,
    Updater,
};
use optlock::version::{self, ConflictError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::Postgres;
use tokio::sync::{Mutex, MutexGuard};

use crate::query::{self, QueryError};
use crate::store::Filter;

type SharedTransaction = Arc<Mutex<Option<sqlx::Transaction<'static, Postgres>>>>;

/// Error returned when opening or closing a [Transaction].
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    /// A connection could not be acquired to open the transaction.
    #[error("failed to begin a new transaction: {0}")]
    Begin(#[source] sqlx::Error),

    /// The transaction has already been committed or rolled back
    /// through another handle.
    #[error("the transaction has already been committed or rolled back")]
    Closed,

    /// The database refused to commit the transaction.
    #[error("failed to commit transaction: {0}")]
    Commit(#[source] sqlx::Error),

    /// The database failed to roll back the transaction.
    #[error("failed to roll back transaction: {0}")]
    Rollback(#[source] sqlx::Error),
}

/// Error returned by [`Store::with_transaction`][crate::Store::with_transaction].
#[derive(Debug, thiserror::Error)]
pub enum ScopeError<E = Infallible> {
    /// The transaction could not be opened or committed.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// The scoped function failed, and the transaction has been rolled back.
    #[error("transaction aborted: {0}")]
    Aborted(#[source] E),
}

/// Handle to an open PostgreSQL transaction, implementing every store trait.
///
/// Handles are cheap to clone and share the same underlying transaction:
/// operations issued through any of them are serialized on the same
/// connection, and become visible to the rest of the system only once
/// the transaction is committed.
pub struct Transaction<Id, T> {
    tx: SharedTransaction,
    record_type: Arc<str>,
    clock: Arc<dyn Clock>,
    id: PhantomData<Id>,
    t: PhantomData<T>,
}

impl<Id, T> Clone for Transaction<Id, T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            record_type: self.record_type.clone(),
            clock: self.clock.clone(),
            id: PhantomData,
            t: PhantomData,
        }
    }
}

impl<Id, T> Debug for Transaction<Id, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Transaction")
            .field("record_type", &self.record_type)
            .finish_non_exhaustive()
    }
}

impl<Id, T> Transaction<Id, T> {
    pub(crate) fn new(
        tx: sqlx::Transaction<'static, Postgres>,
        record_type: Arc<str>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tx: Arc::new(Mutex::new(Some(tx))),
            record_type,
            clock,
            id: PhantomData,
            t: PhantomData,
        }
    }

    /// Returns the record type name this handle is scoped to.
    #[must_use]
    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    /// Returns a handle to the same transaction, scoped to a different
    /// record type.
    #[must_use]
    pub fn for_record_type<OtherId, OtherT>(
        &self,
        record_type: impl Into<Arc<str>>,
    ) -> Transaction<OtherId, OtherT> {
        Transaction {
            tx: self.tx.clone(),
            record_type: record_type.into(),
            clock: self.clock.clone(),
            id: PhantomData,
            t: PhantomData,
        }
    }

    /// Executes a raw statement inside the transaction,
    /// e.g. `SET TRANSACTION ISOLATION LEVEL SERIALIZABLE`.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is closed or the database returns an error.
    pub async fn execute(&self, statement: &str) -> Result<u64, anyhow::Error> {
        let mut guard = self.tx.lock().await;
        let tx = open(&mut guard)?;

        let result = sqlx::query(statement).execute(&mut **tx).await?;

        Ok(result.rows_affected())
    }

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Fails if the transaction has already been closed,
    /// or if the database refuses the commit.
    pub async fn commit(&self) -> Result<(), TransactionError> {
        let tx = self.tx.lock().await.take().ok_or(TransactionError::Closed)?;

        tx.commit().await.map_err(TransactionError::Commit)
    }

    /// Rolls the transaction back.
    ///
    /// # Errors
    ///
    /// Fails if the transaction has already been closed,
    /// or if the database returned an error.
    pub async fn rollback(&self) -> Result<(), TransactionError> {
        let tx = self.tx.lock().await.take().ok_or(TransactionError::Closed)?;

        tx.rollback().await.map_err(TransactionError::Rollback)
    }
}

fn open<'g>(
    guard: &'g mut MutexGuard<'_, Option<sqlx::Transaction<'static, Postgres>>>,
) -> Result<&'g mut sqlx::Transaction<'static, Postgres>, QueryError> {
    (**guard).as_mut().ok_or(QueryError::TransactionClosed)
}

#[async_trait]
impl<Id, T> Finder<Id, T> for Transaction<Id, T>
where
    Id: ToString + FromStr + Send + Sync,
    <Id as FromStr>::Err: std::error::Error + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn find(&self, id: &Id) -> Result<Record<Id, T>, FindError> {
        let mut guard = self.tx.lock().await;
        let tx = open(&mut guard)?;

        query::find(&mut **tx, &self.record_type, id)
            .await?
            .ok_or(FindError::NotFound)
    }
}

#[async_trait]
impl<Id, T> Creator<Id, T> for Transaction<Id, T>
where
    Id: ToString + FromStr + Send + Sync,
    <Id as FromStr>::Err: std::error::Error + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn create(&self, id: Id, payload: T) -> Result<Record<Id, T>, CreateError> {
        let mut guard = self.tx.lock().await;
        let tx = open(&mut guard)?;

        query::insert(&mut **tx, &self.record_type, &id, &payload, self.clock.now())
            .await?
            .ok_or(CreateError::AlreadyExists)
    }
}

#[async_trait]
impl<Id, T> Updater<Id, T> for Transaction<Id, T>
where
    Id: ToString + FromStr + Send + Sync,
    <Id as FromStr>::Err: std::error::Error + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn update(&self, record: &mut Record<Id, T>) -> Result<(), UpdateError> {
        let mut guard = self.tx.lock().await;
        let tx = open(&mut guard)?;

        let committed =
            query::compare_and_swap(&mut **tx, &self.record_type, record, self.clock.now())
                .await?;

        if let Some((version, updated_at)) = committed {
            record.version = version;
            record.updated_at = updated_at;
            return Ok(());
        }

        let actual = query::current_version(&mut **tx, &self.record_type, &record.id).await?;

        Err(UpdateError::Conflict(ConflictError {
            expected: record.version,
            actual,
        }))
    }
}

#[async_trait]
impl<Id, T> Deleter<Id> for Transaction<Id, T>
where
    Id: ToString + Send + Sync,
    T: Send + Sync,
{
    async fn delete(&self, id: &Id, check: version::Check) -> Result<(), DeleteError> {
        let mut guard = self.tx.lock().await;
        let tx = open(&mut guard)?;

        query::delete(&mut **tx, &self.record_type, id, check).await
    }
}

#[async_trait]
impl<Id, T> Lister<Id, T> for Transaction<Id, T>
where
    Id: ToString + FromStr + Send + Sync,
    <Id as FromStr>::Err: std::error::Error + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Filter = Filter;

    async fn list(
        &self,
        filter: &Self::Filter,
        pagination: Pagination,
    ) -> Result<Vec<Record<Id, T>>, ListError> {
        let mut guard = self.tx.lock().await;
        let tx = open(&mut guard)?;

        Ok(query::list(&mut **tx, &self.record_type, filter, pagination).await?)
    }

    async fn count(&self, filter: &Self::Filter) -> Result<u64, ListError> {
        let mut guard = self.tx.lock().await;
        let tx = open(&mut guard)?;

        Ok(query::count(&mut **tx, &self.record_type, filter).await?)
    }

    async fn page(
        &self,
        filter: &Self::Filter,
        pagination: Pagination,
    ) -> Result<Page<Record<Id, T>>, ListError> {
        let mut guard = self.tx.lock().await;
        let tx = open(&mut guard)?;

        Ok(query::page(&mut **tx, &self.record_type, filter, pagination).await?)
    }
}
