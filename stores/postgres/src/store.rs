//! Contains the pool-backed [Store] implementation.

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::future::Future;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use optlock::clock::{Clock, SystemClock};
use optlock::pagination::{Page, Pagination};
use optlock::record::Record;
use optlock::store::{
    CreateError, Creator, DeleteError, Deleter, FindError, Finder, ListError, Lister, UpdateError,
    Updater,
};
use optlock::version::{self, ConflictError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::PgPool;

use crate::query::{self, QueryError};
use crate::transaction::{ScopeError, Transaction, TransactionError};

/// Filter used by [Store] and [Transaction] to list records.
///
/// Records match when their JSON payload contains the given document,
/// following the semantics of the PostgreSQL `@>` operator on `JSONB` values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    contains: Option<serde_json::Value>,
}

impl Filter {
    /// Matches every record of the store's record type.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches records whose payload contains the provided JSON document.
    #[must_use]
    pub fn containing(document: serde_json::Value) -> Self {
        Self {
            contains: Some(document),
        }
    }

    /// Matches records whose payload contains the JSON serialization of `document`.
    ///
    /// # Errors
    ///
    /// Fails if `document` cannot be serialized to JSON.
    pub fn containing_serialized<D>(document: &D) -> Result<Self, serde_json::Error>
    where
        D: Serialize + ?Sized,
    {
        serde_json::to_value(document).map(Self::containing)
    }

    pub(crate) fn contains(&self) -> Option<&serde_json::Value> {
        self.contains.as_ref()
    }
}

impl From<QueryError> for FindError {
    fn from(err: QueryError) -> Self {
        Self::Internal(err.into())
    }
}

impl From<QueryError> for CreateError {
    fn from(err: QueryError) -> Self {
        Self::Internal(err.into())
    }
}

impl From<QueryError> for UpdateError {
    fn from(err: QueryError) -> Self {
        Self::Internal(err.into())
    }
}

impl From<QueryError> for DeleteError {
    fn from(err: QueryError) -> Self {
        Self::Internal(err.into())
    }
}

impl From<QueryError> for ListError {
    fn from(err: QueryError) -> Self {
        Self::Internal(err.into())
    }
}

/// Versioned record store backed by a PostgreSQL connection pool.
///
/// All records live in the same table, partitioned by a record type name:
/// two [Store] instances using different record types never see each
/// other's records.
///
/// Payloads are stored as `JSONB`, identifiers as their [`ToString`]
/// representation, parsed back through [`FromStr`].
pub struct Store<Id, T> {
    pool: PgPool,
    record_type: Arc<str>,
    clock: Arc<dyn Clock>,
    id: PhantomData<Id>,
    t: PhantomData<T>,
}

impl<Id, T> Clone for Store<Id, T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            record_type: self.record_type.clone(),
            clock: self.clock.clone(),
            id: PhantomData,
            t: PhantomData,
        }
    }
}

impl<Id, T> Debug for Store<Id, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Store")
            .field("pool", &self.pool)
            .field("record_type", &self.record_type)
            .finish_non_exhaustive()
    }
}

impl<Id, T> Store<Id, T> {
    /// Creates a new [Store] for the given record type.
    ///
    /// # Errors
    ///
    /// Fails if the database migrations could not be applied.
    pub async fn new(
        pool: PgPool,
        record_type: impl Into<Arc<str>>,
    ) -> Result<Self, sqlx::migrate::MigrateError> {
        // Make sure the latest migrations are used before using the Store instance.
        crate::MIGRATIONS.run(&pool).await?;

        Ok(Self {
            pool,
            record_type: record_type.into(),
            clock: Arc::new(SystemClock),
            id: PhantomData,
            t: PhantomData,
        })
    }

    /// Uses the given [Clock] to stamp creation and update times.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Returns the record type name this store is scoped to.
    #[must_use]
    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    /// Returns the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Opens a new [Transaction] on the pool.
    ///
    /// The transaction is rolled back when every handle to it has been dropped
    /// without calling [`Transaction::commit`].
    ///
    /// # Errors
    ///
    /// Fails if a connection could not be acquired from the pool.
    pub async fn begin(&self) -> Result<Transaction<Id, T>, TransactionError> {
        let tx = self.pool.begin().await.map_err(TransactionError::Begin)?;

        Ok(Transaction::new(
            tx,
            self.record_type.clone(),
            self.clock.clone(),
        ))
    }

    /// Runs `f` inside a new [Transaction], committing it if `f` succeeds
    /// and rolling it back otherwise.
    ///
    /// The [Transaction] passed to `f` can be re-scoped to other record types
    /// through [`Transaction::for_record_type`], to change multiple kinds of
    /// records atomically.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::Aborted`] with the error returned by `f`, or
    /// [`ScopeError::Transaction`] if the transaction could not be opened
    /// or committed.
    pub async fn with_transaction<F, Fut, R, E>(&self, f: F) -> Result<R, ScopeError<E>>
    where
        F: FnOnce(Transaction<Id, T>) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let tx = self.begin().await?;

        match f(tx.clone()).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            },
            Err(err) => {
                match tx.rollback().await {
                    Ok(()) | Err(TransactionError::Closed) => (),
                    Err(rollback_err) => tracing::error!(
                        record_type = %self.record_type,
                        error = %rollback_err,
                        "failed to roll back aborted transaction"
                    ),
                }

                Err(ScopeError::Aborted(err))
            },
        }
    }
}

#[async_trait]
impl<Id, T> Finder<Id, T> for Store<Id, T>
where
    Id: ToString + FromStr + Send + Sync,
    <Id as FromStr>::Err: std::error::Error + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn find(&self, id: &Id) -> Result<Record<Id, T>, FindError> {
        query::find(&self.pool, &self.record_type, id)
            .await?
            .ok_or(FindError::NotFound)
    }
}

#[async_trait]
impl<Id, T> Creator<Id, T> for Store<Id, T>
where
    Id: ToString + FromStr + Send + Sync,
    <Id as FromStr>::Err: std::error::Error + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn create(&self, id: Id, payload: T) -> Result<Record<Id, T>, CreateError> {
        query::insert(&self.pool, &self.record_type, &id, &payload, self.clock.now())
            .await?
            .ok_or(CreateError::AlreadyExists)
    }
}

#[async_trait]
impl<Id, T> Updater<Id, T> for Store<Id, T>
where
    Id: ToString + FromStr + Send + Sync,
    <Id as FromStr>::Err: std::error::Error + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn update(&self, record: &mut Record<Id, T>) -> Result<(), UpdateError> {
        let committed =
            query::compare_and_swap(&self.pool, &self.record_type, record, self.clock.now())
                .await?;

        if let Some((version, updated_at)) = committed {
            record.version = version;
            record.updated_at = updated_at;
            return Ok(());
        }

        // Only used to report the conflict, the version might have changed again already.
        let actual = query::current_version(&self.pool, &self.record_type, &record.id).await?;

        tracing::debug!(
            record_type = %self.record_type,
            id = %record.id.to_string(),
            expected = record.version,
            ?actual,
            "version conflict on update"
        );

        Err(UpdateError::Conflict(ConflictError {
            expected: record.version,
            actual,
        }))
    }
}

#[async_trait]
impl<Id, T> Deleter<Id> for Store<Id, T>
where
    Id: ToString + Send + Sync,
    T: Send + Sync,
{
    async fn delete(&self, id: &Id, check: version::Check) -> Result<(), DeleteError> {
        let mut conn = self.pool.acquire().await.map_err(QueryError::from)?;

        query::delete(&mut conn, &self.record_type, id, check).await
    }
}

#[async_trait]
impl<Id, T> Lister<Id, T> for Store<Id, T>
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
        Ok(query::list(&self.pool, &self.record_type, filter, pagination).await?)
    }

    async fn count(&self, filter: &Self::Filter) -> Result<u64, ListError> {
        Ok(query::count(&self.pool, &self.record_type, filter).await?)
    }

    async fn page(
        &self,
        filter: &Self::Filter,
        pagination: Pagination,
    ) -> Result<Page<Record<Id, T>>, ListError> {
        let mut tx = self.pool.begin().await.map_err(QueryError::from)?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(QueryError::from)?;

        let page = query::page(&mut *tx, &self.record_type, filter, pagination).await?;

        tx.commit().await.map_err(QueryError::from)?;

        Ok(page)
    }
}
