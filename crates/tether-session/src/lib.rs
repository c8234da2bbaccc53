//! Distributed session cache kept consistent with a durable backing store.
//!
//! Each process (peer) holds a bounded LRU cache of sessions in front of a
//! store shared with other peers. The crate provides:
//! - Version fencing so a peer notices when another peer took over a session
//! - Single-winner insertion when threads race to load the same session
//! - Immediate, deferred and time-based write policies
//! - Expiry sweeps with a scheduling gate and a guard against resurrection
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tether_session::{BackedStore, MemoryStore, NoopListener, StoreConfig};
//!
//! let store = BackedStore::new(StoreConfig::default(), MemoryStore::new(), Arc::new(NoopListener))?;
//! let session = store.create_session("abcdefghijklmnopqrstuvw")?;
//! session.set_attribute("user", serde_json::json!("ada"));
//! store.release_session(&session);
//! ```

mod backend;
mod cache;
mod clock;
mod config;
mod error;
mod guard;
mod memory;
mod record;
mod store;

pub use backend::{BackingStore, InsertOutcome, NoopListener, SessionListener};
pub use cache::SessionCache;
pub use clock::{Clock, ManualClock, SystemClock, local_hour};
pub use config::{
    DEFAULT_CAPACITY, DEFAULT_ID_LENGTH, DEFAULT_MAX_INACTIVE_SECS,
    DEFAULT_RECENTLY_INVALIDATED_CAPACITY, DEFAULT_WRITE_INTERVAL, StoreConfig, WritePolicy,
};
pub use error::{Error, Result};
pub use guard::RecentlyInvalidated;
pub use memory::MemoryStore;
pub use record::{MAX_VERSION, NEVER_EXPIRES, Session, SessionSnapshot, SessionState, next_version};
pub use store::{BackedStore, InvalidationReport, MAX_WRITE_DEFERRALS, StoreStats, WriteReport};
