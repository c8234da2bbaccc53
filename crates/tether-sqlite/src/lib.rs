//! SQLite backing store for tether sessions.
//!
//! Sessions live in one table keyed by id and application name. Attributes are
//! either kept as a JSON document on the session row ([`Layout::SingleRow`]) or
//! as one row each ([`Layout::MultiRow`]). The schema is managed by embedded
//! migrations.

mod error;
mod store;

pub use error::{Result, SqliteStoreError};
pub use store::{DEFAULT_INVALIDATION_CHECK_INTERVAL, Layout, SqliteStore};
