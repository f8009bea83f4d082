//! Startup and periodic eviction of expired cached documents.
//!
//! Cleanup is background work: failures are logged and swallowed so they
//! never crash a consuming UI. Eviction racing a foreground read is fine; a
//! row disappearing mid-read is just a cache miss.

use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::storage::{now_ms, SqliteStorage};

/// Remove every evictable document older than `ttl`.
///
/// Pure with respect to collection state: running it twice in a row with no
/// intervening writes removes nothing the second time. Dictionary entries
/// are never touched.
pub fn cleanup_expired_documents(storage: &SqliteStorage, ttl: Duration) -> Result<u64> {
  let cutoff = now_ms() - ttl.as_millis() as i64;
  let removed = storage.purge_expired(cutoff)?;
  if removed > 0 {
    tracing::info!(removed, "evicted expired cached documents");
  }
  Ok(removed)
}

/// Run a cleanup function once at startup, fire-and-forget.
pub fn run_initial_cleanup<F>(cleanup: F)
where
  F: FnOnce() -> Result<u64> + Send + 'static,
{
  tokio::spawn(async move {
    if let Err(e) = cleanup() {
      tracing::warn!("initial cleanup failed: {:#}", e);
    }
  });
}

/// Handle to a scheduled cleanup task. Dropping it stops the schedule.
pub struct CleanupHandle {
  task: JoinHandle<()>,
}

impl Drop for CleanupHandle {
  fn drop(&mut self) {
    self.task.abort();
  }
}

/// Run a cleanup function every `interval` until the handle is dropped.
pub fn schedule_periodic_cleanup<F>(cleanup: F, interval: Duration) -> CleanupHandle
where
  F: Fn() -> Result<u64> + Send + 'static,
{
  let task = tokio::spawn(async move {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; startup cleanup is separate
    ticker.tick().await;

    loop {
      ticker.tick().await;
      if let Err(e) = cleanup() {
        tracing::warn!("periodic cleanup failed: {:#}", e);
      }
    }
  });

  CleanupHandle { task }
}

/// Convenience wiring: startup sweep plus a periodic schedule over the
/// shared storage, both using the configured TTL.
pub fn start_cleanup(
  storage: Arc<SqliteStorage>,
  ttl: Duration,
  interval: Duration,
) -> CleanupHandle {
  let startup_storage = Arc::clone(&storage);
  run_initial_cleanup(move || cleanup_expired_documents(&startup_storage, ttl));

  schedule_periodic_cleanup(move || cleanup_expired_documents(&storage, ttl), interval)
}
