//! Local-first stores built on the embedded cache database.
//!
//! Reads are served from the local copy whenever it is fresh enough;
//! misses and staleness go through the replication bridge to the remote.
//! Every store exposes observable cells so consumers get push updates
//! instead of polling.

pub mod cleanup;
pub mod dictionary;
pub mod entity_store;
pub mod signal;
pub mod storage;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;

pub use cleanup::{
  cleanup_expired_documents, run_initial_cleanup, schedule_periodic_cleanup, start_cleanup,
  CleanupHandle,
};
pub use dictionary::DictionaryStore;
pub use entity_store::{ChildOptions, EntityStore, ListOptions, Page, SyncReport};
pub use signal::{Signal, StoreSignals, Subscription};
pub use storage::SqliteStorage;
pub use traits::{CacheResult, CacheSource, EntityRecord};
