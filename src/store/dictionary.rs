//! Fully-cached reference tables (sex, status, country, service codes).
//!
//! Dictionaries are small enough that the right policy is load everything,
//! hold it resident, refresh wholesale on reinitialization. Entries resolve
//! synchronously once initialized and are never TTL-evicted while the
//! process lives; the local copy only exists so an offline start still has
//! labels to show.

use color_eyre::Result;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::entities::{DictionaryEntry, DICTIONARY_TABLES};
use crate::remote::{is_network_error, retry_with_backoff, RemoteSource, SelectQuery};

use super::signal::StoreSignals;
use super::storage::SqliteStorage;

pub struct DictionaryStore<R> {
  remote: Arc<R>,
  storage: Arc<SqliteStorage>,
  /// Resident entries keyed by (table, id)
  entries: RwLock<HashMap<(String, String), DictionaryEntry>>,
  signals: StoreSignals,
}

impl<R: RemoteSource> DictionaryStore<R> {
  pub fn new(remote: Arc<R>, storage: Arc<SqliteStorage>) -> Self {
    Self {
      remote,
      storage,
      entries: RwLock::new(HashMap::new()),
      signals: StoreSignals::new(),
    }
  }

  pub fn signals(&self) -> &StoreSignals {
    &self.signals
  }

  pub fn is_initialized(&self) -> bool {
    self.signals.initialized.get()
  }

  /// Load every dictionary table in full.
  ///
  /// Online, each table is fetched wholesale, persisted locally, and made
  /// resident. A network failure is retried briefly and then falls back to
  /// the local copy; a logic
  /// failure aborts initialization. Calling again refreshes wholesale.
  pub async fn initialize(&self) -> Result<()> {
    self.signals.loading.set(true);
    let mut loaded: HashMap<(String, String), DictionaryEntry> = HashMap::new();

    for table in DICTIONARY_TABLES {
      let fetched = retry_with_backoff(3, Duration::from_millis(100), || {
        self.remote.select(SelectQuery::new(table))
      })
      .await;

      let entries = match fetched {
        Ok(rows) => {
          let mut entries = Vec::with_capacity(rows.len());
          for row in rows {
            let entry: DictionaryEntry = serde_json::from_value(row)
              .map_err(|e| color_eyre::eyre::eyre!("Bad dictionary row in '{}': {}", table, e))?;
            entries.push(entry);
          }
          self.storage.replace_dictionary(table, &entries)?;
          entries
        }
        Err(report) if is_network_error(&report) => {
          tracing::warn!(table, "dictionary fetch offline, using local copy");
          self.storage.load_dictionary(table)?
        }
        Err(report) => {
          self.signals.error.set(Some(format!("{:#}", report)));
          self.signals.loading.set(false);
          return Err(report);
        }
      };

      for entry in entries {
        loaded.insert((table.to_string(), entry.id.clone()), entry);
      }
    }

    {
      let mut guard = self.entries.write().expect("dictionary lock poisoned");
      *guard = loaded;
    }

    self.signals.error.set(None);
    self.signals.loading.set(false);
    self.signals.initialized.set(true);
    Ok(())
  }

  /// Resolve an entry synchronously. Returns None before initialization
  /// completes; callers retry after a bounded wait.
  pub fn get_record_by_id(&self, table: &str, id: &str) -> Option<DictionaryEntry> {
    if !self.is_initialized() {
      return None;
    }
    self
      .entries
      .read()
      .expect("dictionary lock poisoned")
      .get(&(table.to_string(), id.to_string()))
      .cloned()
  }

  /// Resolve an entry by its code. Dictionaries are small; a scan is fine.
  pub fn get_by_code(&self, table: &str, code: &str) -> Option<DictionaryEntry> {
    if !self.is_initialized() {
      return None;
    }
    self
      .entries
      .read()
      .expect("dictionary lock poisoned")
      .iter()
      .find(|((t, _), entry)| t == table && entry.code == code)
      .map(|(_, entry)| entry.clone())
  }

  /// Bounded wait for initialization: fixed delay between checks, never an
  /// unbounded block. Returns whether the store came up in time.
  pub async fn wait_until_initialized(&self, attempts: u32, delay: Duration) -> bool {
    for _ in 0..attempts {
      if self.is_initialized() {
        return true;
      }
      tokio::time::sleep(delay).await;
    }
    self.is_initialized()
  }
}
