//! Schema/collection registry with versioned migrations.
//!
//! `get_or_create_collection` is idempotent: asking twice for the same name
//! returns the same handle. The first open of a collection whose stored
//! version is behind its declared schema version runs the registered
//! migrations in order, each inside a transaction; a migration failure is
//! surfaced immediately and leaves the collection unopened.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::Mutex;

use super::Database;

/// One step of a collection's migration history.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
  /// Version this migration brings the collection up to
  pub to_version: i64,
  pub sql: &'static str,
}

/// Declared schema for one physical collection.
#[derive(Debug, Clone, Copy)]
pub struct CollectionSchema {
  pub name: &'static str,
  /// Monotonic schema version; `create_sql` always produces this version
  pub version: i64,
  pub create_sql: &'static str,
  /// Ordered by `to_version`, ascending
  pub migrations: &'static [Migration],
}

/// Handle to an opened collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
  pub name: String,
  pub version: i64,
}

/// Registry of opened collections.
pub struct Registry {
  open: Mutex<HashMap<String, Collection>>,
}

impl Registry {
  pub fn new() -> Self {
    Self {
      open: Mutex::new(HashMap::new()),
    }
  }

  /// Return the existing handle for `schema.name`, or register the
  /// collection (creating or migrating it on disk) and return a new one.
  pub fn get_or_create_collection(
    &self,
    db: &Database,
    schema: &CollectionSchema,
  ) -> Result<Collection> {
    let mut open = self
      .open
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if let Some(existing) = open.get(schema.name) {
      return Ok(existing.clone());
    }

    let collection = Self::open_collection(db, schema)?;
    open.insert(schema.name.to_string(), collection.clone());
    Ok(collection)
  }

  fn open_collection(db: &Database, schema: &CollectionSchema) -> Result<Collection> {
    let conn = db.conn()?;

    let exists: bool = conn
      .query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        [schema.name],
        |row| row.get::<_, i64>(0),
      )
      .map(|n| n > 0)
      .map_err(|e| eyre!("Failed to inspect schema for '{}': {}", schema.name, e))?;

    if !exists {
      // Fresh collection: create_sql produces the latest version directly
      conn
        .execute_batch(schema.create_sql)
        .map_err(|e| eyre!("Failed to create collection '{}': {}", schema.name, e))?;
      Self::set_version(&conn, schema.name, schema.version)?;

      return Ok(Collection {
        name: schema.name.to_string(),
        version: schema.version,
      });
    }

    let stored = Self::stored_version(&conn, schema.name)?;
    if stored > schema.version {
      return Err(eyre!(
        "Collection '{}' is at version {} but the declared schema is version {}; downgrade is not supported",
        schema.name,
        stored,
        schema.version
      ));
    }

    if stored < schema.version {
      Self::migrate(&conn, schema, stored)?;
    }

    Ok(Collection {
      name: schema.name.to_string(),
      version: schema.version,
    })
  }

  /// Run every migration with `to_version > stored`, in order. Fatal on
  /// failure: the transaction is rolled back and the error surfaced.
  fn migrate(conn: &rusqlite::Connection, schema: &CollectionSchema, stored: i64) -> Result<()> {
    for migration in schema.migrations {
      if migration.to_version <= stored {
        continue;
      }

      tracing::info!(
        collection = schema.name,
        to_version = migration.to_version,
        "running collection migration"
      );

      conn
        .execute_batch("BEGIN")
        .map_err(|e| eyre!("Failed to begin migration transaction: {}", e))?;

      let applied = conn
        .execute_batch(migration.sql)
        .and_then(|_| {
          conn
            .execute(
              "INSERT OR REPLACE INTO collection_meta (name, version) VALUES (?, ?)",
              rusqlite::params![schema.name, migration.to_version],
            )
            .map(|_| ())
        });

      match applied {
        Ok(()) => {
          conn
            .execute_batch("COMMIT")
            .map_err(|e| eyre!("Failed to commit migration: {}", e))?;
        }
        Err(e) => {
          let _ = conn.execute_batch("ROLLBACK");
          return Err(eyre!(
            "Migration of '{}' to version {} failed: {}",
            schema.name,
            migration.to_version,
            e
          ));
        }
      }
    }

    Ok(())
  }

  fn stored_version(conn: &rusqlite::Connection, name: &str) -> Result<i64> {
    let version: Option<i64> = conn
      .query_row(
        "SELECT version FROM collection_meta WHERE name = ?",
        [name],
        |row| row.get(0),
      )
      .ok();

    // A collection created before the meta table tracked it is version 1
    Ok(version.unwrap_or(1))
  }

  fn set_version(conn: &rusqlite::Connection, name: &str, version: i64) -> Result<()> {
    conn
      .execute(
        "INSERT OR REPLACE INTO collection_meta (name, version) VALUES (?, ?)",
        rusqlite::params![name, version],
      )
      .map_err(|e| eyre!("Failed to record version for '{}': {}", name, e))?;
    Ok(())
  }
}

impl Default for Registry {
  fn default() -> Self {
    Self::new()
  }
}
