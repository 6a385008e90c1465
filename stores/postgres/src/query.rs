use std::str::FromStr;

use chrono::{DateTime, Utc};
use optlock::record::Record;
use optlock::store::DeleteError;
use optlock::version::{self, ConflictError, Version};
use optlock::{Page, Pagination};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, PgExecutor, Postgres, Row};

use crate::store::Filter;

const RECORD_COLUMNS: &str = "record_id, version, created_at, updated_at, payload";

#[derive(Debug, thiserror::Error)]
pub(crate) enum QueryError {
    #[error("failed to get column '{name}' from result row: {error}")]
    ReadColumn {
        name: &'static str,
        #[source]
        error: sqlx::Error,
    },
    #[error("failed to parse record id '{value}': {error}")]
    ParseId {
        value: String,
        #[source]
        error: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
    #[error("version {0} does not fit into a database column")]
    VersionOutOfRange(Version),
    #[error("negative version {0} found in the database")]
    NegativeVersion(i64),
    #[error("the transaction has already been committed or rolled back")]
    TransactionClosed,
    #[error("db returned an error: {0}")]
    Database(#[from] sqlx::Error),
}

fn try_get_column<T>(row: &PgRow, name: &'static str) -> Result<T, QueryError>
where
    for<'a> T: sqlx::Type<Postgres> + sqlx::Decode<'a, Postgres>,
{
    row.try_get(name)
        .map_err(|err| QueryError::ReadColumn { name, error: err })
}

fn version_to_column(version: Version) -> Result<i64, QueryError> {
    i64::try_from(version).map_err(|_| QueryError::VersionOutOfRange(version))
}

fn version_from_column(value: i64) -> Result<Version, QueryError> {
    Version::try_from(value).map_err(|_| QueryError::NegativeVersion(value))
}

fn record_from_row<Id, T>(row: &PgRow) -> Result<Record<Id, T>, QueryError>
where
    Id: FromStr,
    <Id as FromStr>::Err: std::error::Error + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
{
    let id_column: String = try_get_column(row, "record_id")?;
    let version_column: i64 = try_get_column(row, "version")?;
    let created_at_column: DateTime<Utc> = try_get_column(row, "created_at")?;
    let updated_at_column: DateTime<Utc> = try_get_column(row, "updated_at")?;
    let payload_column: Json<T> = try_get_column(row, "payload")?;

    let id = id_column.parse().map_err(|err| QueryError::ParseId {
        value: id_column.clone(),
        error: Box::new(err),
    })?;

    Ok(Record {
        id,
        version: version_from_column(version_column)?,
        created_at: created_at_column,
        updated_at: updated_at_column,
        payload: payload_column.0,
    })
}

pub(crate) async fn find<'e, E, Id, T>(
    executor: E,
    record_type: &str,
    id: &Id,
) -> Result<Option<Record<Id, T>>, QueryError>
where
    E: PgExecutor<'e>,
    Id: ToString + FromStr,
    <Id as FromStr>::Err: std::error::Error + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
{
    let row = sqlx::query(&format!(
        "SELECT {RECORD_COLUMNS}
        FROM versioned_records
        WHERE record_type = $1 AND record_id = $2"
    ))
    .bind(record_type)
    .bind(id.to_string())
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(record_from_row).transpose()
}

/// Returns `None` when a record with the same id already exists.
pub(crate) async fn insert<'e, E, Id, T>(
    executor: E,
    record_type: &str,
    id: &Id,
    payload: &T,
    now: DateTime<Utc>,
) -> Result<Option<Record<Id, T>>, QueryError>
where
    E: PgExecutor<'e>,
    Id: ToString + FromStr,
    <Id as FromStr>::Err: std::error::Error + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let row = sqlx::query(&format!(
        "INSERT INTO versioned_records
            (record_type, record_id, version, created_at, updated_at, payload)
        VALUES ($1, $2, $3, $4, $4, $5)
        ON CONFLICT (record_type, record_id) DO NOTHING
        RETURNING {RECORD_COLUMNS}"
    ))
    .bind(record_type)
    .bind(id.to_string())
    .bind(version_to_column(version::INITIAL)?)
    .bind(now)
    .bind(Json(payload))
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(record_from_row).transpose()
}

/// Compare-and-swap on the version column.
///
/// The version check and the write happen in the same statement, so the row lock
/// taken by PostgreSQL serializes concurrent writers: the losing one re-evaluates
/// the predicate against the committed row and matches nothing.
///
/// Returns `Ok(None)` when no row matched, which covers both a stale version
/// and a missing record.
pub(crate) async fn compare_and_swap<'e, E, Id, T>(
    executor: E,
    record_type: &str,
    record: &Record<Id, T>,
    now: DateTime<Utc>,
) -> Result<Option<(Version, DateTime<Utc>)>, QueryError>
where
    E: PgExecutor<'e>,
    Id: ToString,
    T: Serialize + Sync,
{
    let row = sqlx::query(
        "UPDATE versioned_records
        SET version = version + 1,
            updated_at = GREATEST(updated_at, $4),
            payload = $5
        WHERE record_type = $1 AND record_id = $2 AND version = $3
        RETURNING version, updated_at",
    )
    .bind(record_type)
    .bind(record.id.to_string())
    .bind(version_to_column(record.version)?)
    .bind(now)
    .bind(Json(&record.payload))
    .fetch_optional(executor)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let version_column: i64 = try_get_column(&row, "version")?;
    let updated_at_column: DateTime<Utc> = try_get_column(&row, "updated_at")?;

    Ok(Some((version_from_column(version_column)?, updated_at_column)))
}

pub(crate) async fn current_version<'e, E, Id>(
    executor: E,
    record_type: &str,
    id: &Id,
) -> Result<Option<Version>, QueryError>
where
    E: PgExecutor<'e>,
    Id: ToString,
{
    let row = sqlx::query(
        "SELECT version FROM versioned_records WHERE record_type = $1 AND record_id = $2",
    )
    .bind(record_type)
    .bind(id.to_string())
    .fetch_optional(executor)
    .await?;

    row.map(|row| try_get_column(&row, "version").and_then(version_from_column))
        .transpose()
}

/// Deletes the record if its version satisfies the check.
///
/// When nothing is deleted, the current version is read on the same connection
/// to tell a missing record apart from a version mismatch.
pub(crate) async fn delete<Id>(
    conn: &mut PgConnection,
    record_type: &str,
    id: &Id,
    check: version::Check,
) -> Result<(), DeleteError>
where
    Id: ToString,
{
    let expected_version = match check {
        version::Check::Any => None,
        version::Check::MustBe(v) => Some(version_to_column(v)?),
    };

    let result = sqlx::query(
        "DELETE FROM versioned_records
        WHERE record_type = $1 AND record_id = $2
            AND ($3::BIGINT IS NULL OR version = $3)",
    )
    .bind(record_type)
    .bind(id.to_string())
    .bind(expected_version)
    .execute(&mut *conn)
    .await
    .map_err(QueryError::from)?;

    if result.rows_affected() > 0 {
        return Ok(());
    }

    let version::Check::MustBe(expected) = check else {
        return Err(DeleteError::NotFound);
    };

    match current_version(&mut *conn, record_type, id).await? {
        None => Err(DeleteError::NotFound),
        Some(actual) => Err(DeleteError::Conflict(ConflictError {
            expected,
            actual: Some(actual),
        })),
    }
}

pub(crate) async fn list<'e, E, Id, T>(
    executor: E,
    record_type: &str,
    filter: &Filter,
    pagination: Pagination,
) -> Result<Vec<Record<Id, T>>, QueryError>
where
    E: PgExecutor<'e>,
    Id: FromStr,
    <Id as FromStr>::Err: std::error::Error + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
{
    let limit = i64::try_from(pagination.limit()).unwrap_or(i64::MAX);
    let offset = i64::try_from(pagination.offset()).unwrap_or(i64::MAX);

    let rows = sqlx::query(&format!(
        "SELECT {RECORD_COLUMNS}
        FROM versioned_records
        WHERE record_type = $1 AND ($2::JSONB IS NULL OR payload @> $2)
        ORDER BY seq
        LIMIT $3 OFFSET $4"
    ))
    .bind(record_type)
    .bind(filter.contains())
    .bind(limit)
    .bind(offset)
    .fetch_all(executor)
    .await?;

    rows.iter().map(record_from_row).collect()
}

pub(crate) async fn count<'e, E>(
    executor: E,
    record_type: &str,
    filter: &Filter,
) -> Result<u64, QueryError>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query(
        "SELECT COUNT(*) AS total
        FROM versioned_records
        WHERE record_type = $1 AND ($2::JSONB IS NULL OR payload @> $2)",
    )
    .bind(record_type)
    .bind(filter.contains())
    .fetch_one(executor)
    .await?;

    let total: i64 = try_get_column(&row, "total")?;

    // COUNT(*) is never negative.
    Ok(u64::try_from(total).unwrap_or_default())
}

/// Lists one page of records together with the total number of matches.
///
/// Items and total come from the same statement, hence from the same snapshot
/// whatever the isolation level. A separate count is issued only when the page
/// is empty, since there is no row to carry the window total.
pub(crate) async fn page<Id, T>(
    conn: &mut PgConnection,
    record_type: &str,
    filter: &Filter,
    pagination: Pagination,
) -> Result<Page<Record<Id, T>>, QueryError>
where
    Id: FromStr,
    <Id as FromStr>::Err: std::error::Error + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
{
    let limit = i64::try_from(pagination.limit()).unwrap_or(i64::MAX);
    let offset = i64::try_from(pagination.offset()).unwrap_or(i64::MAX);

    let rows = sqlx::query(&format!(
        "SELECT {RECORD_COLUMNS}, COUNT(*) OVER () AS total
        FROM versioned_records
        WHERE record_type = $1 AND ($2::JSONB IS NULL OR payload @> $2)
        ORDER BY seq
        LIMIT $3 OFFSET $4"
    ))
    .bind(record_type)
    .bind(filter.contains())
    .bind(limit)
    .bind(offset)
    .fetch_all(&mut *conn)
    .await?;

    let total = match rows.first() {
        Some(row) => {
            let total: i64 = try_get_column(row, "total")?;
            u64::try_from(total).unwrap_or_default()
        },
        None => count(&mut *conn, record_type, filter).await?,
    };

    let items = rows
        .iter()
        .map(record_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        total,
        pagination,
    })
}
