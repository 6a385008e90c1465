//! Module `record` contains the [Record] type, the unit of persistence
//! handled by a [Store][crate::store::Store].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::version::Version;

/// A domain payload that has been persisted to a [Store][crate::store::Store],
/// together with the bookkeeping fields owned by the store.
///
/// The `version` and timestamps are assigned by the store: on creation, and
/// on every committed [update][crate::store::Updater::update]. Callers own the
/// `payload`, which they should only change through a
/// [Mutator][crate::mutation::Mutator] or before an explicit update call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record<Id, T> {
    /// Unique identifier of the record.
    pub id: Id,

    /// Optimistic locking token of the record.
    ///
    /// Check the [Version] type and module documentation for more info.
    pub version: Version,

    /// Time of the record creation, assigned by the store.
    pub created_at: DateTime<Utc>,

    /// Time of the last committed update, assigned by the store.
    ///
    /// Never moves backwards for the same record.
    pub updated_at: DateTime<Utc>,

    /// The domain payload carried by the record.
    pub payload: T,
}
