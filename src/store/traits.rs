//! Core traits and result types for the entity cache.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

/// Trait for primary entity documents that can be cached locally.
///
/// Implementors must provide a stable primary key and optionally an
/// updated_at timestamp used for freshness checks and push-sync ordering.
pub trait EntityRecord: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Stable primary key, globally unique within the entity's collection
  fn id(&self) -> String;

  /// Last modification timestamp (ISO 8601).
  /// Returns None if the entity doesn't track modification time.
  fn updated_at(&self) -> Option<&str>;

  /// Physical collection name for this entity type (e.g., "breeds", "pets")
  fn collection() -> &'static str;

  /// Soft-delete tombstone flag. Tombstoned rows are retained so deletions
  /// can propagate during push-sync; only eviction removes them physically.
  fn is_deleted(&self) -> bool {
    false
  }
}

/// Indicates where a read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from the remote backend
  Remote,
  /// Data from the local cache, still considered fresh
  CacheFresh,
  /// Data from the local cache, past its stale time
  CacheStale,
  /// Offline - remote unreachable, serving whatever is cached
  Offline,
}

/// Result of a read operation, carrying the data plus provenance metadata.
///
/// Foreground failures surface inside this shape (`errors`) rather than as
/// exceptions across the store boundary, so callers can render a best-effort
/// dataset alongside whatever went wrong.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
  /// When the data was cached (None for data straight from the remote)
  pub cached_at: Option<DateTime<Utc>>,
  /// Partial failures collected along the way (e.g. one partition's fetch)
  pub errors: Vec<String>,
}

impl<T> CacheResult<T> {
  pub fn from_remote(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Remote,
      cached_at: None,
      errors: Vec::new(),
    }
  }

  pub fn from_cache(data: T, cached_at: DateTime<Utc>, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      cached_at: Some(cached_at),
      errors: Vec::new(),
    }
  }

  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
      errors: Vec::new(),
    }
  }

  pub fn with_errors(mut self, errors: Vec<String>) -> Self {
    self.errors = errors;
    self
  }
}
