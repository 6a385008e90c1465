//! Contains the types necessary for Optimistic Locking through versioning.

/// A version used for Optimistic Locking.
///
/// Every [Record][crate::record::Record] carries one, and only a
/// [Store][crate::store::Store] implementation is allowed to move it forward:
/// exactly by one for every committed update.
pub type Version = u64;

/// The [Version] assigned to a freshly created [Record][crate::record::Record].
pub const INITIAL: Version = 0;

/// Used to set a specific expectation during an operation
/// that mutates some sort of resource (e.g. a [Record][crate::record::Record] deletion)
/// that supports versioning.
///
/// It allows for optimistic locking, avoiding data races
/// when modifying the same resource at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    /// Disables any kind of optimistic locking check, allowing
    /// for any [Version] to be found on the resource.
    Any,
    /// Expects that the current [Version] of the resource
    /// must have the value specified.
    MustBe(Version),
}

impl Check {
    /// Returns true if the provided [Version] satisfies the expectation.
    #[must_use]
    pub fn is_satisfied_by(&self, version: Version) -> bool {
        match self {
            Check::Any => true,
            Check::MustBe(expected) => *expected == version,
        }
    }
}

/// This error is returned by a function when a version conflict error has
/// been detected.
///
/// `actual` is [None] when the resource could not be found at all at the time
/// of the check, which happens when the record has been deleted by a concurrent writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("conflict error detected, expected version was: {expected}, found: {}", display_actual(.actual))]
pub struct ConflictError {
    /// The [Version] value that was expected when calling the function that failed.
    pub expected: Version,

    /// The actual [Version] value, which mismatch caused this error.
    pub actual: Option<Version>,
}

fn display_actual(actual: &Option<Version>) -> String {
    match actual {
        Some(v) => v.to_string(),
        None => "<missing>".to_owned(),
    }
}
