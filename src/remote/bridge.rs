//! Online/offline detection and error classification for the sync path.
//!
//! Errors caught while talking to the remote fall into two classes: network
//! (offline, connect failure, timeout) and logic (validation, not found,
//! decode). Network errors are transient and eligible for caller-side retry
//! with backoff; logic errors are surfaced immediately.

use color_eyre::Report;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Classification of a caught remote error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Transient connectivity problem; retryable, degrades to cached data
  Network,
  /// Validation, not-found, decode; surfaced to the caller immediately
  Logic,
}

/// Classify an error report by walking its chain.
pub fn classify(report: &Report) -> ErrorKind {
  if is_network_error(report) {
    ErrorKind::Network
  } else {
    ErrorKind::Logic
  }
}

/// Whether any cause in the chain is a connectivity-level failure.
pub fn is_network_error(report: &Report) -> bool {
  report.chain().any(|cause| {
    if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
      return e.is_connect() || e.is_timeout();
    }
    if let Some(e) = cause.downcast_ref::<std::io::Error>() {
      return matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionRefused
          | std::io::ErrorKind::ConnectionReset
          | std::io::ErrorKind::ConnectionAborted
          | std::io::ErrorKind::NotConnected
          | std::io::ErrorKind::TimedOut
          | std::io::ErrorKind::BrokenPipe
      );
    }
    false
  })
}

/// Boolean connectivity gate consulted before issuing a remote fetch.
///
/// When offline, stores serve whatever is locally cached and tag the
/// response as potentially stale rather than blocking on the transport.
pub struct SyncBridge {
  online: AtomicBool,
}

impl SyncBridge {
  pub fn new() -> Self {
    Self {
      online: AtomicBool::new(true),
    }
  }

  pub fn is_online(&self) -> bool {
    self.online.load(Ordering::Relaxed)
  }

  pub fn is_offline(&self) -> bool {
    !self.is_online()
  }

  pub fn set_online(&self, online: bool) {
    let was = self.online.swap(online, Ordering::Relaxed);
    if was != online {
      tracing::info!(online, "connectivity changed");
    }
  }

  /// Feed a request outcome into the gate: network failures flip it
  /// offline, any success flips it back online.
  pub fn observe(&self, report: &Report) {
    if is_network_error(report) {
      self.set_online(false);
    }
  }
}

impl Default for SyncBridge {
  fn default() -> Self {
    Self::new()
  }
}

/// Retry an operation on network errors with a bounded, linearly growing
/// backoff. Logic errors are returned immediately.
pub async fn retry_with_backoff<T, F, Fut>(
  attempts: u32,
  base_delay: Duration,
  mut op: F,
) -> color_eyre::Result<T>
where
  F: FnMut() -> Fut,
  Fut: std::future::Future<Output = color_eyre::Result<T>>,
{
  let mut attempt = 0u32;
  loop {
    match op().await {
      Ok(value) => return Ok(value),
      Err(report) => {
        attempt += 1;
        if attempt >= attempts || classify(&report) == ErrorKind::Logic {
          return Err(report);
        }
        let delay = base_delay * attempt;
        tracing::debug!(attempt, ?delay, "transient remote failure, retrying");
        tokio::time::sleep(delay).await;
      }
    }
  }
}
