//! Local-first entity cache and synchronization layer for a pet-breeding
//! registry backend.
//!
//! Entity reads go to the embedded SQLite cache first; misses and stale
//! queries are fetched from the remote registry API, written through the
//! cache, and served from the merged local view. Local writes are marked
//! pending and pushed on the next sync pass, so the library stays usable
//! while offline.

pub mod config;
pub mod db;
pub mod entities;
pub mod remote;
pub mod store;

pub use config::Config;
pub use remote::{RemoteClient, SyncBridge};
pub use store::{DictionaryStore, EntityStore, SqliteStorage};
