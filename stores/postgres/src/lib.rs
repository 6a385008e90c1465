//! PostgreSQL implementation of the [`optlock`] versioned record stores.
//!
//! All record types share a single `versioned_records` table, created by the
//! embedded [`MIGRATIONS`] when a [`Store`] is first built.
//!
//! ```no_run
//! # use envconfig::Envconfig;
//! # use optlock::{Creator, Mutator};
//! # use optlock_postgres::config::Config;
//! # use optlock_postgres::Store;
//! # async fn dox() -> anyhow::Result<()> {
//! let config = Config::init_from_env()?;
//! let store = Store::<i64, serde_json::Value>::new(config.connect().await?, "executions").await?;
//!
//! let record = store.create(1, serde_json::json!({ "status": "pending" })).await?;
//!
//! Mutator::new(store)
//!     .with_policy(config.retry_policy())
//!     .apply(record, |execution| {
//!         execution["status"] = "running".into();
//!         Ok::<(), std::convert::Infallible>(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code, unused_qualifications, trivial_casts)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
mod query;
pub mod store;
pub mod transaction;

pub use store::{Filter, Store};
pub use transaction::{ScopeError, Transaction, TransactionError};

/// Embedded migrations creating the tables used by the stores in this crate.
pub static MIGRATIONS: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
