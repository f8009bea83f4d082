//! Embedded local database for the cache.
//!
//! Raw block storage is delegated to SQLite; this module only owns the
//! connection lifecycle and the collection registry built on top of it.

pub mod registry;
pub mod schema;

use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Connection wrapper shared by the storage adapter and the registry.
pub struct Database {
  conn: Mutex<Connection>,
}

impl Database {
  /// Open or create the database at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open an in-memory database. Used by tests and throwaway instances.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;

    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(
        "PRAGMA journal_mode = WAL;
         CREATE TABLE IF NOT EXISTS collection_meta (
             name TEXT PRIMARY KEY,
             version INTEGER NOT NULL
         );",
      )
      .map_err(|e| eyre!("Failed to initialize database: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Lock and return the underlying connection.
  pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}
