//! Remote backend access: query client and replication/sync bridge.

pub mod bridge;
pub mod client;

pub use bridge::{classify, is_network_error, retry_with_backoff, ErrorKind, SyncBridge};
pub use client::{Filter, RemoteClient, RemoteSource, SelectQuery};
