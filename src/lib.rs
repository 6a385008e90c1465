//! `optlock` contains the building blocks to safely mutate versioned
//! records shared by concurrent writers, without holding locks.
//!
//! ## Versioned records
//!
//! Every [`Record`] persisted in a [`Store`] carries a [`Version`]: a counter
//! that the store, and only the store, increments by exactly one on every
//! committed update.
//!
//! Updates are compare-and-swap operations: [`Updater::update`] commits only
//! if the version carried by the caller's copy is still the persisted one,
//! and fails with a [conflict][version::ConflictError] otherwise.
//!
//! ## Mutating records
//!
//! The [`Mutator`] turns a "read, transform, commit" sequence into a single
//! logical operation: it applies a mutation function to the latest known
//! payload and retries it from scratch on every conflict, following
//! a [`RetryPolicy`].
//!
//! ```
//! # use optlock::{Creator, InMemory, Mutator};
//! # async fn dox() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemory::<u64, String>::default();
//! let record = store.create(1, "pending".to_owned()).await?;
//!
//! let committed = Mutator::new(store)
//!     .apply(record, |status| {
//!         *status = "running".to_owned();
//!         Ok::<(), std::convert::Infallible>(())
//!     })
//!     .await?;
//!
//! assert_eq!(1, committed.version);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code, unused_qualifications, trivial_casts)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]

pub mod cancel;
pub mod clock;
pub mod mutation;
pub mod pagination;
pub mod record;
pub mod store;
pub mod tracing;
pub mod version;

pub use crate::cancel::Cancellation;
pub use crate::mutation::{Mutator, RetryPolicy};
pub use crate::pagination::{Page, Pagination};
pub use crate::record::Record;
pub use crate::store::{Creator, Deleter, Finder, InMemory, Lister, Store, Updater};
pub use crate::version::Version;
