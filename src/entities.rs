//! Domain types for the breeding registry and their cache integration.
//!
//! Primary entities (breeds, pets, kennels, litters) each map to one
//! physical collection. Child tables are multiplexed into one
//! `<entity>_children` collection per owning entity, disambiguated by
//! `table_type`, with their table-specific fields carried in the open
//! `additional` bag. The bag is validated here, at the insertion boundary,
//! rather than left to consumer-side field guessing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::traits::EntityRecord;

// ============================================================================
// Primary entities
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Breed {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub fci_group: Option<String>,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub updated_at: Option<String>,
  #[serde(default, rename = "_deleted")]
  pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pet {
  pub id: String,
  pub name: String,
  pub breed_id: String,
  #[serde(default)]
  pub sex_id: Option<String>,
  #[serde(default)]
  pub kennel_id: Option<String>,
  #[serde(default)]
  pub birth_date: Option<String>,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub updated_at: Option<String>,
  #[serde(default, rename = "_deleted")]
  pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Kennel {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub country_id: Option<String>,
  #[serde(default)]
  pub owner_name: Option<String>,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub updated_at: Option<String>,
  #[serde(default, rename = "_deleted")]
  pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Litter {
  pub id: String,
  pub kennel_id: String,
  #[serde(default)]
  pub breed_id: Option<String>,
  #[serde(default)]
  pub letter: Option<String>,
  #[serde(default)]
  pub birth_date: Option<String>,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub updated_at: Option<String>,
  #[serde(default, rename = "_deleted")]
  pub deleted: bool,
}

impl EntityRecord for Breed {
  fn id(&self) -> String {
    self.id.clone()
  }

  fn updated_at(&self) -> Option<&str> {
    self.updated_at.as_deref()
  }

  fn collection() -> &'static str {
    "breeds"
  }

  fn is_deleted(&self) -> bool {
    self.deleted
  }
}

impl EntityRecord for Pet {
  fn id(&self) -> String {
    self.id.clone()
  }

  fn updated_at(&self) -> Option<&str> {
    self.updated_at.as_deref()
  }

  fn collection() -> &'static str {
    "pets"
  }

  fn is_deleted(&self) -> bool {
    self.deleted
  }
}

impl EntityRecord for Kennel {
  fn id(&self) -> String {
    self.id.clone()
  }

  fn updated_at(&self) -> Option<&str> {
    self.updated_at.as_deref()
  }

  fn collection() -> &'static str {
    "kennels"
  }

  fn is_deleted(&self) -> bool {
    self.deleted
  }
}

impl EntityRecord for Litter {
  fn id(&self) -> String {
    self.id.clone()
  }

  fn updated_at(&self) -> Option<&str> {
    self.updated_at.as_deref()
  }

  fn collection() -> &'static str {
    "litters"
  }

  fn is_deleted(&self) -> bool {
    self.deleted
  }
}

// ============================================================================
// Dictionaries
// ============================================================================

/// Small reference-table entry (status, sex, country, service codes).
/// Fully resident once loaded; never TTL-evicted while the process lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DictionaryEntry {
  pub id: String,
  pub code: String,
  pub name: String,
}

/// Every dictionary table, loaded in full at store initialization.
pub const DICTIONARY_TABLES: &[&str] = &["sex", "status", "country", "service_code"];

// ============================================================================
// Child records
// ============================================================================

/// Generic junction-derived record.
///
/// `{id, table_type, parent_id, additional, cached_at}` is the on-disk
/// contract any new child-table integration must honor. The composite
/// `(parent_id, table_type)` index is the only supported lookup path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChildRecord {
  pub id: String,
  pub table_type: String,
  pub parent_id: String,
  /// Open attribute bag holding all source-table-specific fields.
  /// Opaque to the cache layer; validated per table_type at insertion.
  pub additional: Value,
  /// Insertion timestamp, epoch milliseconds
  pub cached_at: i64,
}

/// How a logical child table maps onto the remote backend.
#[derive(Debug, Clone, Copy)]
pub struct ChildTableSpec {
  /// Logical source table name; the `table_type` discriminator on disk
  pub table_type: &'static str,
  /// Remote junction table to fetch rows from
  pub remote_table: &'static str,
  /// Junction column holding the owning entity's id
  pub parent_column: &'static str,
  /// Physical `<entity>_children` collection the rows land in
  pub children_collection: &'static str,
  /// Partition-pruned enrichment, if the junction references a partitioned table
  pub partition: Option<PartitionSpec>,
}

/// Enrichment against a source table partitioned by a secondary key.
///
/// Junction rows are grouped by `partition_column` before issuing remote
/// queries, so each enrichment call touches exactly one partition instead of
/// scanning across all of them.
#[derive(Debug, Clone, Copy)]
pub struct PartitionSpec {
  /// Partitioned remote table holding the detail rows (e.g. "pets")
  pub source_table: &'static str,
  /// Partition key present on both the junction row and the source table
  pub partition_column: &'static str,
  /// Junction column referencing the source table's primary key
  pub ref_column: &'static str,
  /// Key under which the detail row is merged into `additional`
  pub merge_key: &'static str,
}

/// Registered child tables.
///
/// Child tables are folded into one `<entity>_children` collection per
/// owning entity rather than given their own physical collections; the
/// multiplexed row shape is the external wire contract. What the folding
/// gives up in per-table schema guarantees is recovered by
/// [`validate_additional`] at the insertion boundary.
pub const CHILD_TABLES: &[ChildTableSpec] = &[
  ChildTableSpec {
    table_type: "pet_in_litter",
    remote_table: "pet_in_litter",
    parent_column: "litter_id",
    children_collection: "litter_children",
    partition: Some(PartitionSpec {
      source_table: "pets",
      partition_column: "breed_id",
      ref_column: "pet_id",
      merge_key: "pet",
    }),
  },
  ChildTableSpec {
    table_type: "pet_service",
    remote_table: "pet_services",
    parent_column: "pet_id",
    children_collection: "pet_children",
    partition: None,
  },
  ChildTableSpec {
    table_type: "kennel_breed",
    remote_table: "kennel_breeds",
    parent_column: "kennel_id",
    children_collection: "kennel_children",
    partition: None,
  },
];

/// Look up the spec for a logical child table.
pub fn child_table_spec(table_type: &str) -> Option<&'static ChildTableSpec> {
  CHILD_TABLES.iter().find(|s| s.table_type == table_type)
}

/// Validate an `additional` bag against its table_type's expected shape.
///
/// Known table types require their junction columns to be present; unknown
/// table types only need to be JSON objects. Returns a description of the
/// problem rather than an error type so failures can be collected into
/// best-effort result shapes.
pub fn validate_additional(table_type: &str, additional: &Value) -> Result<(), String> {
  let obj = additional
    .as_object()
    .ok_or_else(|| format!("additional for '{}' must be an object", table_type))?;

  let required: &[&str] = match table_type {
    "pet_in_litter" => &["pet_id", "breed_id"],
    "pet_service" => &["service_code_id"],
    "kennel_breed" => &["breed_id"],
    _ => &[],
  };

  for field in required {
    if !obj.contains_key(*field) {
      return Err(format!(
        "additional for '{}' is missing required field '{}'",
        table_type, field
      ));
    }
  }

  Ok(())
}
