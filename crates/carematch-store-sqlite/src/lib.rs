//! SQLite backend for the carematch document store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Documents carry a version column that
//! every write compares against, giving the same optimistic compare-and-swap
//! the hosted document database offers.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
