//! Offset/limit pagination for [Lister][crate::store::Lister] queries.

use serde::{Deserialize, Serialize};

/// Page size used when none (or zero) has been requested.
pub const DEFAULT_SIZE: u32 = 30;

/// Largest page size a caller is allowed to request.
pub const MAX_SIZE: u32 = 100;

/// Describes which slice of a result set to return.
///
/// Pages are numbered from 1. Use [Pagination::new] to build one from
/// untrusted input: out of range values are clamped rather than rejected.
/// Deserialization goes through the same normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawPagination")]
pub struct Pagination {
    page: u32,
    size: u32,
}

#[derive(Deserialize)]
struct RawPagination {
    #[serde(default)]
    page: u32,
    #[serde(default)]
    size: u32,
}

impl From<RawPagination> for Pagination {
    fn from(raw: RawPagination) -> Self {
        Self::new(raw.page, raw.size)
    }
}

impl Pagination {
    /// Creates a new [Pagination], normalizing the values provided:
    /// a zero page becomes the first page, a zero size becomes [DEFAULT_SIZE],
    /// and sizes above [MAX_SIZE] are capped.
    #[must_use]
    pub fn new(page: u32, size: u32) -> Self {
        let size = match size {
            0 => DEFAULT_SIZE,
            s => s.min(MAX_SIZE),
        };

        Self {
            page: page.max(1),
            size,
        }
    }

    /// Returns the 1-based page number.
    #[must_use]
    pub fn page(&self) -> u32 {
        self.page
    }

    /// Returns the page size.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Number of items to skip: `(page - 1) * size`.
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.size)
    }

    /// Maximum number of items to return.
    #[must_use]
    pub fn limit(&self) -> u64 {
        u64::from(self.size)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(1, DEFAULT_SIZE)
    }
}

/// A slice of a result set, together with the total number of items
/// matching the same filter, read from the same snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<R> {
    /// The items in the requested page, in store order.
    pub items: Vec<R>,

    /// Total number of items matching the filter, ignoring pagination.
    pub total: u64,

    /// The pagination used to select this page.
    pub pagination: Pagination,
}

impl<R> Page<R> {
    /// Returns the number of pages needed to list all matching items.
    #[must_use]
    pub fn total_pages(&self) -> u64 {
        self.total.div_ceil(self.pagination.limit())
    }

    /// Returns true if there are more pages after this one.
    #[must_use]
    pub fn has_next(&self) -> bool {
        u64::from(self.pagination.page()) < self.total_pages()
    }
}
