//! SQLite-backed storage adapter for the entity cache.
//!
//! Documents are stored as serialized JSON blobs, with the columns the cache
//! layer itself needs (tombstone, pending-sync marker, insertion timestamp)
//! lifted out beside the payload.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use std::path::Path;
use std::sync::Arc;

use crate::db::registry::Registry;
use crate::db::{schema, Database};
use crate::entities::{validate_additional, ChildRecord, ChildTableSpec, DictionaryEntry};

use super::traits::EntityRecord;

/// A cached entity along with its cache-layer metadata.
#[derive(Debug, Clone)]
pub struct CachedEntity<T> {
  pub entity: T,
  pub cached_at: DateTime<Utc>,
  /// A local write the remote has not acknowledged yet
  pub pending_sync: bool,
  pub deleted: bool,
}

/// A locally written row awaiting push to the remote.
#[derive(Debug, Clone)]
pub struct PendingRow<T> {
  pub entity: T,
  pub deleted: bool,
}

/// Current time as epoch milliseconds, the `cached_at` unit.
pub fn now_ms() -> i64 {
  Utc::now().timestamp_millis()
}

fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
  DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

pub struct SqliteStorage {
  db: Arc<Database>,
}

impl SqliteStorage {
  /// Open the cache database at the given path and register every
  /// collection, running any pending migrations.
  pub fn open(path: &Path) -> Result<Self> {
    let db = Arc::new(Database::open(path)?);
    Self::bootstrap(db)
  }

  /// In-memory storage for tests and throwaway instances.
  pub fn open_in_memory() -> Result<Self> {
    let db = Arc::new(Database::open_in_memory()?);
    Self::bootstrap(db)
  }

  fn bootstrap(db: Arc<Database>) -> Result<Self> {
    let registry = Registry::new();
    for collection in schema::ALL_COLLECTIONS {
      registry.get_or_create_collection(&db, collection)?;
    }
    Ok(Self { db })
  }

  // ==========================================================================
  // Entity documents
  // ==========================================================================

  /// Insert-or-update an entity by primary key.
  ///
  /// Idempotent: if the serialized content is identical to the stored row,
  /// only `cached_at` is refreshed and the payload (including `updated_at`)
  /// is left untouched. Returns whether the payload changed.
  pub fn upsert_entity<T: EntityRecord>(&self, entity: &T, pending_sync: bool) -> Result<bool> {
    let conn = self.db.conn()?;
    let table = T::collection();
    let id = entity.id();
    let data = serde_json::to_vec(entity).map_err(|e| eyre!("Failed to serialize entity: {}", e))?;

    let existing: Option<Vec<u8>> = conn
      .query_row(
        &format!("SELECT data FROM {} WHERE id = ?", table),
        params![id],
        |row| row.get(0),
      )
      .ok();

    if existing.as_deref() == Some(data.as_slice()) {
      conn
        .execute(
          &format!("UPDATE {} SET cached_at = ? WHERE id = ?", table),
          params![now_ms(), id],
        )
        .map_err(|e| eyre!("Failed to refresh entity: {}", e))?;
      return Ok(false);
    }

    conn
      .execute(
        &format!(
          "INSERT OR REPLACE INTO {} (id, data, updated_at, deleted, pending_sync, cached_at)
           VALUES (?, ?, ?, ?, ?, ?)",
          table
        ),
        params![
          id,
          data,
          entity.updated_at(),
          entity.is_deleted() as i64,
          pending_sync as i64,
          now_ms()
        ],
      )
      .map_err(|e| eyre!("Failed to store entity: {}", e))?;

    Ok(true)
  }

  /// Upsert a batch of remotely fetched entities.
  ///
  /// Rows with an unpushed local edit (`pending_sync`) are skipped so a pull
  /// never silently discards a local write; they win until pushed.
  pub fn upsert_remote_entities<T: EntityRecord>(&self, entities: &[T]) -> Result<u64> {
    let mut stored = 0u64;
    for entity in entities {
      let id = entity.id();
      let pending = {
        let conn = self.db.conn()?;
        conn
          .query_row(
            &format!("SELECT pending_sync FROM {} WHERE id = ?", T::collection()),
            params![id],
            |row| row.get::<_, i64>(0),
          )
          .ok()
          .map(|v| v != 0)
          .unwrap_or(false)
      };

      if pending {
        tracing::debug!(collection = T::collection(), id = %id, "skipping pull over unpushed local edit");
        continue;
      }

      self.upsert_entity(entity, false)?;
      stored += 1;
    }
    Ok(stored)
  }

  pub fn get_entity<T: EntityRecord>(&self, id: &str) -> Result<Option<CachedEntity<T>>> {
    let conn = self.db.conn()?;

    let row: Option<(Vec<u8>, i64, i64, i64)> = conn
      .query_row(
        &format!(
          "SELECT data, cached_at, pending_sync, deleted FROM {} WHERE id = ?",
          T::collection()
        ),
        params![id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .ok();

    match row {
      Some((data, cached_at, pending_sync, deleted)) => {
        let entity: T = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize entity: {}", e))?;
        Ok(Some(CachedEntity {
          entity,
          cached_at: ms_to_datetime(cached_at),
          pending_sync: pending_sync != 0,
          deleted: deleted != 0,
        }))
      }
      None => Ok(None),
    }
  }

  /// All non-tombstoned entities of one type. Filtering, ordering, and
  /// pagination happen in the store layer on the deserialized documents.
  pub fn list_entities<T: EntityRecord>(&self) -> Result<Vec<CachedEntity<T>>> {
    let conn = self.db.conn()?;

    let mut stmt = conn
      .prepare(&format!(
        "SELECT data, cached_at, pending_sync FROM {} WHERE deleted = 0",
        T::collection()
      ))
      .map_err(|e| eyre!("Failed to prepare entity query: {}", e))?;

    let rows: Vec<(Vec<u8>, i64, i64)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .map_err(|e| eyre!("Failed to query entities: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut entities = Vec::with_capacity(rows.len());
    for (data, cached_at, pending_sync) in rows {
      // A row that no longer deserializes is a cache miss, not a crash
      if let Ok(entity) = serde_json::from_slice::<T>(&data) {
        entities.push(CachedEntity {
          entity,
          cached_at: ms_to_datetime(cached_at),
          pending_sync: pending_sync != 0,
          deleted: false,
        });
      }
    }

    Ok(entities)
  }

  pub fn row_count(&self, collection: &str) -> Result<u64> {
    let conn = self.db.conn()?;
    let count: i64 = conn
      .query_row(&format!("SELECT COUNT(*) FROM {}", collection), [], |row| {
        row.get(0)
      })
      .map_err(|e| eyre!("Failed to count rows: {}", e))?;
    Ok(count as u64)
  }

  /// Soft-delete: set the tombstone and mark the row for push. The row is
  /// never physically removed here; only eviction does that.
  pub fn mark_deleted<T: EntityRecord>(&self, id: &str) -> Result<()> {
    let conn = self.db.conn()?;
    let changed = conn
      .execute(
        &format!(
          "UPDATE {} SET deleted = 1, pending_sync = 1 WHERE id = ?",
          T::collection()
        ),
        params![id],
      )
      .map_err(|e| eyre!("Failed to tombstone entity: {}", e))?;

    if changed == 0 {
      return Err(eyre!("No entity '{}' in {}", id, T::collection()));
    }
    Ok(())
  }

  /// Rows awaiting push to the remote, tombstones included.
  pub fn pending_rows<T: EntityRecord>(&self) -> Result<Vec<PendingRow<T>>> {
    let conn = self.db.conn()?;

    let mut stmt = conn
      .prepare(&format!(
        "SELECT data, deleted FROM {} WHERE pending_sync = 1",
        T::collection()
      ))
      .map_err(|e| eyre!("Failed to prepare pending query: {}", e))?;

    let rows: Vec<(Vec<u8>, i64)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
      .map_err(|e| eyre!("Failed to query pending rows: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut pending = Vec::with_capacity(rows.len());
    for (data, deleted) in rows {
      let entity: T = serde_json::from_slice(&data)
        .map_err(|e| eyre!("Failed to deserialize pending entity: {}", e))?;
      pending.push(PendingRow {
        entity,
        deleted: deleted != 0,
      });
    }

    Ok(pending)
  }

  pub fn clear_pending<T: EntityRecord>(&self, id: &str) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute(
        &format!("UPDATE {} SET pending_sync = 0 WHERE id = ?", T::collection()),
        params![id],
      )
      .map_err(|e| eyre!("Failed to clear pending flag: {}", e))?;
    Ok(())
  }

  // ==========================================================================
  // Child records
  // ==========================================================================

  /// Store child records, validating each `additional` bag against its
  /// table_type at the boundary. Invalid records are rejected rather than
  /// persisted with an unusable shape.
  pub fn put_child_records(&self, spec: &ChildTableSpec, records: &[ChildRecord]) -> Result<()> {
    for record in records {
      validate_additional(&record.table_type, &record.additional)
        .map_err(|e| eyre!("Rejecting child record '{}': {}", record.id, e))?;
    }

    let conn = self.db.conn()?;

    conn
      .execute_batch("BEGIN")
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for record in records {
      let additional = serde_json::to_string(&record.additional)
        .map_err(|e| eyre!("Failed to serialize additional: {}", e))?;

      let stored = conn.execute(
        &format!(
          "INSERT OR REPLACE INTO {} (id, table_type, parent_id, additional, cached_at)
           VALUES (?, ?, ?, ?, ?)",
          spec.children_collection
        ),
        params![
          record.id,
          record.table_type,
          record.parent_id,
          additional,
          record.cached_at
        ],
      );

      if let Err(e) = stored {
        let _ = conn.execute_batch("ROLLBACK");
        return Err(eyre!("Failed to store child record: {}", e));
      }
    }

    conn
      .execute_batch("COMMIT")
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  /// Look up child records by the `(parent_id, table_type)` composite index,
  /// the only supported lookup path.
  pub fn get_child_records(
    &self,
    spec: &ChildTableSpec,
    parent_id: &str,
    limit: Option<u32>,
  ) -> Result<Vec<ChildRecord>> {
    let conn = self.db.conn()?;

    let sql = match limit {
      Some(n) => format!(
        "SELECT id, table_type, parent_id, additional, cached_at FROM {}
         WHERE parent_id = ? AND table_type = ? ORDER BY id LIMIT {}",
        spec.children_collection, n
      ),
      None => format!(
        "SELECT id, table_type, parent_id, additional, cached_at FROM {}
         WHERE parent_id = ? AND table_type = ? ORDER BY id",
        spec.children_collection
      ),
    };

    let mut stmt = conn
      .prepare(&sql)
      .map_err(|e| eyre!("Failed to prepare child query: {}", e))?;

    let rows: Vec<(String, String, String, String, i64)> = stmt
      .query_map(params![parent_id, spec.table_type], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query child records: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut records = Vec::with_capacity(rows.len());
    for (id, table_type, parent_id, additional, cached_at) in rows {
      let additional = serde_json::from_str(&additional)
        .map_err(|e| eyre!("Failed to parse additional bag: {}", e))?;
      records.push(ChildRecord {
        id,
        table_type,
        parent_id,
        additional,
        cached_at,
      });
    }

    Ok(records)
  }

  // ==========================================================================
  // Dictionaries
  // ==========================================================================

  /// Replace one dictionary table wholesale.
  pub fn replace_dictionary(&self, table: &str, entries: &[DictionaryEntry]) -> Result<()> {
    let conn = self.db.conn()?;

    conn
      .execute_batch("BEGIN")
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let replaced = conn
      .execute(
        "DELETE FROM dictionaries WHERE table_name = ?",
        params![table],
      )
      .map(|_| ())
      .and_then(|_| {
        for entry in entries {
          conn.execute(
            "INSERT INTO dictionaries (table_name, id, code, name) VALUES (?, ?, ?, ?)",
            params![table, entry.id, entry.code, entry.name],
          )?;
        }
        Ok(())
      });

    match replaced {
      Ok(()) => conn
        .execute_batch("COMMIT")
        .map_err(|e| eyre!("Failed to commit transaction: {}", e)),
      Err(e) => {
        let _ = conn.execute_batch("ROLLBACK");
        Err(eyre!("Failed to replace dictionary '{}': {}", table, e))
      }
    }
  }

  pub fn load_dictionary(&self, table: &str) -> Result<Vec<DictionaryEntry>> {
    let conn = self.db.conn()?;

    let mut stmt = conn
      .prepare("SELECT id, code, name FROM dictionaries WHERE table_name = ? ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare dictionary query: {}", e))?;

    let entries = stmt
      .query_map(params![table], |row| {
        Ok(DictionaryEntry {
          id: row.get(0)?,
          code: row.get(1)?,
          name: row.get(2)?,
        })
      })
      .map_err(|e| eyre!("Failed to query dictionary: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(entries)
  }

  // ==========================================================================
  // Query log
  // ==========================================================================

  /// Record that a remote query was executed, for freshness decisions.
  pub fn record_query(&self, hash: &str, description: &str) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO query_log (query_hash, description, fetched_at) VALUES (?, ?, ?)",
        params![hash, description, now_ms()],
      )
      .map_err(|e| eyre!("Failed to record query: {}", e))?;
    Ok(())
  }

  pub fn query_fetched_at(&self, hash: &str) -> Result<Option<DateTime<Utc>>> {
    let conn = self.db.conn()?;
    let fetched_at: Option<i64> = conn
      .query_row(
        "SELECT fetched_at FROM query_log WHERE query_hash = ?",
        params![hash],
        |row| row.get(0),
      )
      .ok();
    Ok(fetched_at.map(ms_to_datetime))
  }

  // ==========================================================================
  // Eviction
  // ==========================================================================

  /// Remove every evictable document with `cached_at < cutoff_ms`, and the
  /// query-log entries that aged out with them. Dictionary entries are
  /// exempt. Returns the number of documents removed; running this twice in
  /// a row with no new writes removes nothing the second time.
  pub fn purge_expired(&self, cutoff_ms: i64) -> Result<u64> {
    let conn = self.db.conn()?;
    let mut removed = 0u64;

    for collection in schema::EVICTABLE_COLLECTIONS {
      let n = conn
        .execute(
          &format!("DELETE FROM {} WHERE cached_at < ?", collection),
          params![cutoff_ms],
        )
        .map_err(|e| eyre!("Failed to purge {}: {}", collection, e))?;
      removed += n as u64;
    }

    conn
      .execute(
        "DELETE FROM query_log WHERE fetched_at < ?",
        params![cutoff_ms],
      )
      .map_err(|e| eyre!("Failed to purge query log: {}", e))?;

    Ok(removed)
  }

  /// Backdate a document's `cached_at`, for tests exercising eviction.
  #[cfg(test)]
  pub fn set_cached_at(&self, collection: &str, id: &str, cached_at_ms: i64) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute(
        &format!("UPDATE {} SET cached_at = ? WHERE id = ?", collection),
        params![cached_at_ms, id],
      )
      .map_err(|e| eyre!("Failed to backdate row: {}", e))?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::entities::{child_table_spec, Breed};
  use serde_json::json;

  fn breed(id: &str, name: &str, updated: &str) -> Breed {
    Breed {
      id: id.to_string(),
      name: name.to_string(),
      fci_group: None,
      created_at: None,
      updated_at: Some(updated.to_string()),
      deleted: false,
    }
  }

  #[test]
  fn upsert_identical_content_is_idempotent() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let b = breed("b1", "Samoyed", "2026-01-01T00:00:00Z");

    assert!(storage.upsert_entity(&b, false).unwrap());
    assert!(!storage.upsert_entity(&b, false).unwrap());

    assert_eq!(storage.row_count("breeds").unwrap(), 1);
    let cached = storage.get_entity::<Breed>("b1").unwrap().unwrap();
    assert_eq!(cached.entity.updated_at.as_deref(), Some("2026-01-01T00:00:00Z"));
  }

  #[test]
  fn remote_upsert_skips_pending_local_edit() {
    let storage = SqliteStorage::open_in_memory().unwrap();

    let local = breed("b1", "Samoyed (edited)", "2026-01-02T00:00:00Z");
    storage.upsert_entity(&local, true).unwrap();

    let remote = breed("b1", "Samoyed", "2026-01-01T00:00:00Z");
    let stored = storage.upsert_remote_entities(&[remote]).unwrap();
    assert_eq!(stored, 0);

    let cached = storage.get_entity::<Breed>("b1").unwrap().unwrap();
    assert_eq!(cached.entity.name, "Samoyed (edited)");
    assert!(cached.pending_sync);
  }

  #[test]
  fn tombstone_hides_row_from_lists_but_keeps_it() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .upsert_entity(&breed("b1", "Samoyed", "2026-01-01T00:00:00Z"), false)
      .unwrap();

    storage.mark_deleted::<Breed>("b1").unwrap();

    assert!(storage.list_entities::<Breed>().unwrap().is_empty());
    assert_eq!(storage.row_count("breeds").unwrap(), 1);

    let pending = storage.pending_rows::<Breed>().unwrap();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].deleted);
  }

  #[test]
  fn child_records_round_trip_through_composite_index() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let spec = child_table_spec("pet_in_litter").unwrap();

    let records = vec![
      ChildRecord {
        id: "j1".to_string(),
        table_type: "pet_in_litter".to_string(),
        parent_id: "L1".to_string(),
        additional: json!({"pet_id": "p1", "breed_id": "b1"}),
        cached_at: now_ms(),
      },
      ChildRecord {
        id: "j2".to_string(),
        table_type: "pet_in_litter".to_string(),
        parent_id: "L1".to_string(),
        additional: json!({"pet_id": "p2", "breed_id": "b2"}),
        cached_at: now_ms(),
      },
    ];
    storage.put_child_records(spec, &records).unwrap();

    let loaded = storage.get_child_records(spec, "L1", None).unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].additional["pet_id"], json!("p1"));

    assert!(storage.get_child_records(spec, "L2", None).unwrap().is_empty());
  }

  #[test]
  fn invalid_additional_is_rejected_at_the_boundary() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let spec = child_table_spec("pet_in_litter").unwrap();

    let bad = ChildRecord {
      id: "j1".to_string(),
      table_type: "pet_in_litter".to_string(),
      parent_id: "L1".to_string(),
      additional: json!({"pet_id": "p1"}),
      cached_at: now_ms(),
    };

    assert!(storage.put_child_records(spec, &[bad]).is_err());
    assert_eq!(storage.row_count("litter_children").unwrap(), 0);
  }

  #[test]
  fn purge_removes_only_expired_documents() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let day_ms: i64 = 24 * 60 * 60 * 1000;
    let now = now_ms();

    for (id, age_days) in [("b1", 20), ("b2", 10), ("b3", 1)] {
      storage
        .upsert_entity(&breed(id, "Breed", "2026-01-01T00:00:00Z"), false)
        .unwrap();
      storage
        .set_cached_at("breeds", id, now - age_days * day_ms)
        .unwrap();
    }

    let cutoff = now - 14 * day_ms;
    assert_eq!(storage.purge_expired(cutoff).unwrap(), 1);
    assert!(storage.get_entity::<Breed>("b1").unwrap().is_none());
    assert!(storage.get_entity::<Breed>("b2").unwrap().is_some());
    assert!(storage.get_entity::<Breed>("b3").unwrap().is_some());

    // Second run with no new writes is a no-op
    assert_eq!(storage.purge_expired(cutoff).unwrap(), 0);
  }

  #[test]
  fn dictionary_replaced_wholesale() {
    let storage = SqliteStorage::open_in_memory().unwrap();

    let first = vec![DictionaryEntry {
      id: "1".to_string(),
      code: "M".to_string(),
      name: "Male".to_string(),
    }];
    storage.replace_dictionary("sex", &first).unwrap();

    let second = vec![
      DictionaryEntry {
        id: "1".to_string(),
        code: "M".to_string(),
        name: "Male".to_string(),
      },
      DictionaryEntry {
        id: "2".to_string(),
        code: "F".to_string(),
        name: "Female".to_string(),
      },
    ];
    storage.replace_dictionary("sex", &second).unwrap();

    let loaded = storage.load_dictionary("sex").unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[1].code, "F");
  }
}
