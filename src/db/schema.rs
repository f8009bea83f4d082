//! Declared collection schemas and their migration history.
//!
//! Every collection carries a monotonic version. Opening a collection whose
//! stored version is behind runs the registered migrations in order; a
//! failed migration is fatal for that collection.

use super::registry::{CollectionSchema, Migration};

/// Primary entity collections share one layout: the document payload is a
/// serialized JSON blob, with the columns the cache layer itself needs
/// (tombstone, dirty marker, insertion timestamp) lifted out beside it.
macro_rules! entity_schema {
  ($name:literal) => {
    CollectionSchema {
      name: $name,
      version: 2,
      create_sql: concat!(
        "CREATE TABLE IF NOT EXISTS ",
        $name,
        " (
            id TEXT PRIMARY KEY,
            data BLOB NOT NULL,
            updated_at TEXT,
            deleted INTEGER NOT NULL DEFAULT 0,
            pending_sync INTEGER NOT NULL DEFAULT 0,
            cached_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_",
        $name,
        "_cached_at ON ",
        $name,
        "(cached_at);"
      ),
      migrations: &[Migration {
        to_version: 2,
        sql: concat!(
          "ALTER TABLE ",
          $name,
          " ADD COLUMN pending_sync INTEGER NOT NULL DEFAULT 0;"
        ),
      }],
    }
  };
}

pub const BREEDS: CollectionSchema = entity_schema!("breeds");
pub const PETS: CollectionSchema = entity_schema!("pets");
pub const KENNELS: CollectionSchema = entity_schema!("kennels");
pub const LITTERS: CollectionSchema = entity_schema!("litters");

/// Child collections: all child tables of one primary entity multiplexed
/// into a single physical collection, disambiguated by `table_type`.
/// The composite `(parent_id, table_type)` index is the only lookup path.
macro_rules! children_schema {
  ($name:literal) => {
    CollectionSchema {
      name: $name,
      version: 1,
      create_sql: concat!(
        "CREATE TABLE IF NOT EXISTS ",
        $name,
        " (
            id TEXT NOT NULL,
            table_type TEXT NOT NULL,
            parent_id TEXT NOT NULL,
            additional TEXT NOT NULL,
            cached_at INTEGER NOT NULL,
            PRIMARY KEY (id, table_type)
        );
        CREATE INDEX IF NOT EXISTS idx_",
        $name,
        "_parent ON ",
        $name,
        "(parent_id, table_type);"
      ),
      migrations: &[],
    }
  };
}

pub const LITTER_CHILDREN: CollectionSchema = children_schema!("litter_children");
pub const PET_CHILDREN: CollectionSchema = children_schema!("pet_children");
pub const KENNEL_CHILDREN: CollectionSchema = children_schema!("kennel_children");

/// Dictionary entries for every reference table, tagged by table name.
/// Exempt from TTL eviction; replaced wholesale on refresh.
pub const DICTIONARIES: CollectionSchema = CollectionSchema {
  name: "dictionaries",
  version: 1,
  create_sql: "CREATE TABLE IF NOT EXISTS dictionaries (
        table_name TEXT NOT NULL,
        id TEXT NOT NULL,
        code TEXT NOT NULL,
        name TEXT NOT NULL,
        PRIMARY KEY (table_name, id)
    );",
  migrations: &[],
};

/// Executed remote queries, keyed by a stable hash, used for freshness
/// decisions on list reads.
pub const QUERY_LOG: CollectionSchema = CollectionSchema {
  name: "query_log",
  version: 1,
  create_sql: "CREATE TABLE IF NOT EXISTS query_log (
        query_hash TEXT PRIMARY KEY,
        description TEXT NOT NULL,
        fetched_at INTEGER NOT NULL
    );",
  migrations: &[],
};

/// Every collection the cache opens at startup.
pub const ALL_COLLECTIONS: &[&CollectionSchema] = &[
  &BREEDS,
  &PETS,
  &KENNELS,
  &LITTERS,
  &LITTER_CHILDREN,
  &PET_CHILDREN,
  &KENNEL_CHILDREN,
  &DICTIONARIES,
  &QUERY_LOG,
];

/// Entity collections subject to TTL eviction (dictionaries are exempt).
pub const EVICTABLE_COLLECTIONS: &[&str] = &[
  "breeds",
  "pets",
  "kennels",
  "litters",
  "litter_children",
  "pet_children",
  "kennel_children",
];
