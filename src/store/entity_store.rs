//! Generic entity store: local-first reads with remote reconciliation.
//!
//! Reads check the local cache first and only go to the remote on a miss, a
//! stale query, or an explicit force. Child-record fetches are coalesced per
//! `(parent_id, table_type)` key and partition-pruned against partitioned
//! source tables. Local writes are tombstoned/marked dirty and pushed with
//! `force_sync`.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::config::CacheConfig;
use crate::entities::{child_table_spec, validate_additional, ChildRecord, ChildTableSpec};
use crate::remote::{
  classify, is_network_error, ErrorKind, Filter, RemoteSource, SelectQuery, SyncBridge,
};

use super::signal::StoreSignals;
use super::storage::{now_ms, SqliteStorage};
use super::traits::{CacheResult, EntityRecord};

/// A page of documents plus provenance and collected partial failures.
pub type Page<T> = CacheResult<Vec<T>>;

/// Options for a list read.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
  pub filters: Vec<Filter>,
  /// Column projection pushed down to the remote
  pub columns: Option<Vec<String>>,
  pub order_by: Option<String>,
  pub descending: bool,
  pub limit: Option<u32>,
  pub offset: Option<u32>,
  /// Bypass the freshness check and refetch
  pub force: bool,
}

impl ListOptions {
  pub fn filter(mut self, filter: Filter) -> Self {
    self.filters.push(filter);
    self
  }

  pub fn force(mut self) -> Self {
    self.force = true;
    self
  }

  /// Stable hash identifying this query against one collection, used as the
  /// freshness key in the query log.
  fn cache_hash(&self, collection: &str) -> String {
    let mut input = format!("{}|", collection);
    for filter in &self.filters {
      match filter {
        Filter::Eq { column, value } => input.push_str(&format!("{}=eq.{};", column, value)),
        Filter::In { column, values } => {
          input.push_str(&format!("{}=in.{};", column, values.join(",")))
        }
      }
    }
    if let Some(order_by) = &self.order_by {
      input.push_str(&format!(
        "order={}.{};",
        order_by,
        if self.descending { "desc" } else { "asc" }
      ));
    }
    input.push_str(&format!("limit={:?};offset={:?}", self.limit, self.offset));

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }

  fn description(&self, collection: &str) -> String {
    if self.filters.is_empty() {
      format!("{}: all", collection)
    } else {
      format!("{}: {} filters", collection, self.filters.len())
    }
  }
}

/// Options for a child-record read.
#[derive(Debug, Clone, Default)]
pub struct ChildOptions {
  pub limit: Option<u32>,
  /// Order by a field of the `additional` bag
  pub order_by: Option<String>,
  pub descending: bool,
  pub force: bool,
}

/// Outcome of a push-sync pass: best-effort counts, not first-error aborts.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
  pub synced: u64,
  pub errors: Vec<String>,
}

/// Clonable outcome of one coalesced child fetch, shared between callers.
#[derive(Debug, Clone)]
struct ChildFetch {
  records: Vec<ChildRecord>,
  errors: Vec<String>,
}

/// Error side of a coalesced fetch. The classification rides along so the
/// awaiting callers can tell a dead transport from a bad request; `Report`
/// itself is not `Clone`, so the message is carried as a string.
type ChildFetchError = (ErrorKind, String);

type SharedChildFetch = Shared<BoxFuture<'static, std::result::Result<ChildFetch, ChildFetchError>>>;

pub struct EntityStore<R> {
  remote: Arc<R>,
  storage: Arc<SqliteStorage>,
  bridge: Arc<SyncBridge>,
  stale_ms: i64,
  page_size: u32,
  signals: StoreSignals,
  /// One in-flight child fetch per `(parent_id, table_type)` key; a second
  /// caller awaits the first call's future instead of refetching
  inflight: Mutex<HashMap<(String, String), SharedChildFetch>>,
}

impl<R: RemoteSource> EntityStore<R> {
  pub fn new(
    remote: Arc<R>,
    storage: Arc<SqliteStorage>,
    bridge: Arc<SyncBridge>,
    cache: &CacheConfig,
    page_size: u32,
  ) -> Self {
    let signals = StoreSignals::new();
    signals.initialized.set(true);

    Self {
      remote,
      storage,
      bridge,
      stale_ms: cache.stale_time_ms as i64,
      page_size,
      signals,
      inflight: Mutex::new(HashMap::new()),
    }
  }

  pub fn signals(&self) -> &StoreSignals {
    &self.signals
  }

  fn is_stale(&self, at: DateTime<Utc>) -> bool {
    Utc::now() - at > chrono::Duration::milliseconds(self.stale_ms)
  }

  // ==========================================================================
  // List reads
  // ==========================================================================

  /// Load a page of entities, local-first.
  ///
  /// A query whose log entry is younger than the stale time is served from
  /// the cache. Otherwise the remote is queried with projection, filters,
  /// and pagination pushed down; results are upserted locally and the
  /// merged local view (including unpushed local edits) is returned.
  pub async fn load_entities<T: EntityRecord>(&self, opts: ListOptions) -> Result<Page<T>> {
    let hash = opts.cache_hash(T::collection());
    let fetched_at = self.storage.query_fetched_at(&hash)?;

    if !opts.force {
      if let Some(at) = fetched_at {
        if !self.is_stale(at) {
          let items = self.read_local::<T>(&opts)?;
          return Ok(CacheResult::from_cache(items, at, false));
        }
      }
    }

    if self.bridge.is_offline() {
      let items = self.read_local::<T>(&opts)?;
      return Ok(CacheResult::offline(items, fetched_at.unwrap_or_else(Utc::now)));
    }

    self.signals.loading.set(true);
    let result = self.fetch_entities::<T>(&opts, &hash, fetched_at).await;
    self.signals.loading.set(false);

    match &result {
      Ok(page) => {
        if page.errors.is_empty() {
          self.signals.error.set(None);
        } else {
          self.signals.error.set(Some(page.errors.join("; ")));
        }
      }
      Err(report) => self.signals.error.set(Some(format!("{:#}", report))),
    }

    result
  }

  async fn fetch_entities<T: EntityRecord>(
    &self,
    opts: &ListOptions,
    hash: &str,
    fetched_at: Option<DateTime<Utc>>,
  ) -> Result<Page<T>> {
    let mut query = SelectQuery::new(T::collection());
    query.columns = opts.columns.clone();
    query.filters = opts.filters.clone();
    query.order_by = opts.order_by.clone();
    query.descending = opts.descending;
    query.limit = Some(opts.limit.unwrap_or(self.page_size));
    query.offset = opts.offset;

    match self.remote.select(query).await {
      Ok(rows) => {
        let mut errors = Vec::new();
        let mut parsed: Vec<T> = Vec::with_capacity(rows.len());
        for row in rows {
          match serde_json::from_value::<T>(row) {
            Ok(entity) => parsed.push(entity),
            Err(e) => errors.push(format!("bad {} row: {}", T::collection(), e)),
          }
        }

        self.storage.upsert_remote_entities(&parsed)?;
        self.storage.record_query(hash, &opts.description(T::collection()))?;

        let items = self.read_local::<T>(opts)?;
        Ok(CacheResult::from_remote(items).with_errors(errors))
      }
      Err(report) => {
        self.bridge.observe(&report);
        if is_network_error(&report) {
          // Transient: degrade to whatever is cached, tagged as offline
          let items = self.read_local::<T>(opts)?;
          let result = CacheResult::offline(items, fetched_at.unwrap_or_else(Utc::now))
            .with_errors(vec![format!("{:#}", report)]);
          return Ok(result);
        }
        Err(report)
      }
    }
  }

  /// The merged local-first view: cached rows plus unpushed local edits,
  /// filtered, ordered, and sliced in memory on the deserialized documents.
  fn read_local<T: EntityRecord>(&self, opts: &ListOptions) -> Result<Vec<T>> {
    let cached = self.storage.list_entities::<T>()?;

    let mut items: Vec<T> = cached
      .into_iter()
      .map(|c| c.entity)
      .filter(|entity| {
        let value = match serde_json::to_value(entity) {
          Ok(v) => v,
          Err(_) => return false,
        };
        opts.filters.iter().all(|filter| matches_filter(&value, filter))
      })
      .collect();

    if let Some(order_by) = &opts.order_by {
      items.sort_by(|a, b| {
        let av = field_as_string(a, order_by);
        let bv = field_as_string(b, order_by);
        if opts.descending {
          bv.cmp(&av)
        } else {
          av.cmp(&bv)
        }
      });
    }

    let offset = opts.offset.unwrap_or(0) as usize;
    let items: Vec<T> = items.into_iter().skip(offset).collect();
    let items = match opts.limit {
      Some(limit) => items.into_iter().take(limit as usize).collect(),
      None => items,
    };

    Ok(items)
  }

  // ==========================================================================
  // Child records
  // ==========================================================================

  /// Load the child records of one parent for one logical table.
  ///
  /// The `(parent_id, table_type)` composite index is consulted first; a
  /// miss triggers a remote fetch with partition-pruned enrichment. One
  /// partition failing does not abort the rest: partial results come back
  /// with the failures collected in the result shape.
  pub async fn load_child_records(
    &self,
    parent_id: &str,
    table_type: &str,
    opts: ChildOptions,
  ) -> Result<Page<ChildRecord>> {
    let spec = child_table_spec(table_type)
      .ok_or_else(|| eyre!("Unknown child table type '{}'", table_type))?;

    if !opts.force {
      let cached = self.storage.get_child_records(spec, parent_id, opts.limit)?;
      if !cached.is_empty() {
        let oldest = cached.iter().map(|r| r.cached_at).min().unwrap_or_else(now_ms);
        let at = DateTime::from_timestamp_millis(oldest).unwrap_or_else(Utc::now);
        let stale = self.is_stale(at);
        let records = apply_child_options(cached, &opts);
        return Ok(CacheResult::from_cache(records, at, stale));
      }
    }

    if self.bridge.is_offline() {
      let cached = self.storage.get_child_records(spec, parent_id, opts.limit)?;
      let records = apply_child_options(cached, &opts);
      return Ok(CacheResult::offline(records, Utc::now()));
    }

    let key = (parent_id.to_string(), table_type.to_string());
    let shared = {
      let mut inflight = self
        .inflight
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;

      match inflight.get(&key) {
        Some(existing) => existing.clone(),
        None => {
          let fut = fetch_remote_children(
            Arc::clone(&self.remote),
            Arc::clone(&self.storage),
            spec,
            parent_id.to_string(),
          )
          .boxed()
          .shared();
          inflight.insert(key.clone(), fut.clone());
          fut
        }
      }
    };

    let outcome = shared.await;

    if let Ok(mut inflight) = self.inflight.lock() {
      inflight.remove(&key);
    }

    match outcome {
      Ok(fetch) => {
        let records = apply_child_options(fetch.records, &opts);
        Ok(CacheResult::from_remote(records).with_errors(fetch.errors))
      }
      // Transport-level failure: degrade to the (possibly empty) cache
      Err((ErrorKind::Network, message)) => {
        self.bridge.set_online(false);
        let cached = self.storage.get_child_records(spec, parent_id, opts.limit)?;
        let records = apply_child_options(cached, &opts);
        Ok(CacheResult::offline(records, Utc::now()).with_errors(vec![message]))
      }
      // A bad request is not connectivity; surface it without touching the gate
      Err((ErrorKind::Logic, message)) => Err(eyre!(message)),
    }
  }

  // ==========================================================================
  // Local writes and push-sync
  // ==========================================================================

  /// Create or edit an entity locally, marking it for push.
  pub fn put_entity<T: EntityRecord>(&self, entity: &T) -> Result<()> {
    self.storage.upsert_entity(entity, true)?;
    Ok(())
  }

  /// Soft-delete an entity locally; the tombstone propagates on push.
  pub fn delete_entity<T: EntityRecord>(&self, id: &str) -> Result<()> {
    self.storage.mark_deleted::<T>(id)
  }

  /// Push every unacknowledged local write to the remote.
  ///
  /// Best-effort: each failed record is collected into the report and the
  /// rest continue; nothing aborts on first error. Conflicts resolve
  /// last-write-wins by `updated_at`, with unpushed local edits shielded
  /// from pulls until this succeeds for them.
  pub async fn force_sync(&self) -> Result<SyncReport> {
    use crate::entities::{Breed, Kennel, Litter, Pet};

    let mut report = SyncReport::default();
    self.sync_collection::<Breed>(&mut report).await;
    self.sync_collection::<Pet>(&mut report).await;
    self.sync_collection::<Kennel>(&mut report).await;
    self.sync_collection::<Litter>(&mut report).await;

    tracing::info!(
      synced = report.synced,
      failed = report.errors.len(),
      "push-sync finished"
    );
    Ok(report)
  }

  async fn sync_collection<T: EntityRecord>(&self, report: &mut SyncReport) {
    let pending = match self.storage.pending_rows::<T>() {
      Ok(pending) => pending,
      Err(e) => {
        report
          .errors
          .push(format!("{}: {:#}", T::collection(), e));
        return;
      }
    };

    for row in pending {
      let id = row.entity.id();
      let pushed = if row.deleted {
        self
          .remote
          .delete(T::collection().to_string(), id.clone())
          .await
      } else {
        match serde_json::to_value(&row.entity) {
          Ok(value) => {
            self
              .remote
              .upsert(T::collection().to_string(), vec![value])
              .await
          }
          Err(e) => Err(eyre!("Failed to serialize '{}': {}", id, e)),
        }
      };

      match pushed {
        Ok(()) => match self.storage.clear_pending::<T>(&id) {
          Ok(()) => report.synced += 1,
          Err(e) => report.errors.push(format!("{} {}: {:#}", T::collection(), id, e)),
        },
        Err(e) => {
          self.bridge.observe(&e);
          report
            .errors
            .push(format!("{} {}: {:#}", T::collection(), id, e));
        }
      }
    }
  }
}

fn matches_filter(value: &Value, filter: &Filter) -> bool {
  match filter {
    Filter::Eq { column, value: expected } => value
      .get(column)
      .map(|v| json_to_string(v) == *expected)
      .unwrap_or(false),
    Filter::In { column, values } => value
      .get(column)
      .map(|v| values.contains(&json_to_string(v)))
      .unwrap_or(false),
  }
}

fn json_to_string(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

fn field_as_string<T: serde::Serialize>(entity: &T, field: &str) -> String {
  serde_json::to_value(entity)
    .ok()
    .and_then(|v| v.get(field).map(json_to_string))
    .unwrap_or_default()
}

fn apply_child_options(mut records: Vec<ChildRecord>, opts: &ChildOptions) -> Vec<ChildRecord> {
  if let Some(order_by) = &opts.order_by {
    records.sort_by(|a, b| {
      let av = a.additional.get(order_by).map(json_to_string).unwrap_or_default();
      let bv = b.additional.get(order_by).map(json_to_string).unwrap_or_default();
      if opts.descending {
        bv.cmp(&av)
      } else {
        av.cmp(&bv)
      }
    });
  }
  if let Some(limit) = opts.limit {
    records.truncate(limit as usize);
  }
  records
}

/// Remote fetch for one `(parent_id, table_type)` key.
///
/// Junction rows are fetched in one query, then enriched partition by
/// partition: rows are grouped by the partition key so each enrichment call
/// touches exactly one partition of the source table. Only records from
/// successful partitions are persisted and returned; failed partitions land
/// in the error list and will be refetched on the next miss.
async fn fetch_remote_children<R: RemoteSource>(
  remote: Arc<R>,
  storage: Arc<SqliteStorage>,
  spec: &'static ChildTableSpec,
  parent_id: String,
) -> std::result::Result<ChildFetch, ChildFetchError> {
  let query = SelectQuery::new(spec.remote_table)
    .filter(Filter::eq(spec.parent_column, &parent_id));

  let junction_rows = remote
    .select(query)
    .await
    .map_err(|e| (classify(&e), format!("{:#}", e)))?;

  let mut errors = Vec::new();
  let mut records = Vec::new();

  if let Some(partition) = &spec.partition {
    // Group junction rows by partition key; BTreeMap for deterministic order
    let mut partitions: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for row in junction_rows {
      match row.get(partition.partition_column).map(json_to_string) {
        Some(key) => partitions.entry(key).or_default().push(row),
        None => errors.push(format!(
          "junction row without '{}' dropped",
          partition.partition_column
        )),
      }
    }

    for (partition_key, rows) in partitions {
      let ref_ids: Vec<String> = rows
        .iter()
        .filter_map(|row| row.get(partition.ref_column).map(json_to_string))
        .collect();

      let enrichment = remote
        .select(
          SelectQuery::new(partition.source_table)
            .filter(Filter::eq(partition.partition_column, &partition_key))
            .filter(Filter::is_in("id", ref_ids)),
        )
        .await;

      match enrichment {
        Ok(detail_rows) => {
          let by_id: HashMap<String, &Value> = detail_rows
            .iter()
            .filter_map(|d| d.get("id").map(|id| (json_to_string(id), d)))
            .collect();

          for row in &rows {
            match build_child_record(spec, &parent_id, row, Some((partition, &by_id))) {
              Ok(record) => records.push(record),
              Err(e) => errors.push(e),
            }
          }
        }
        Err(e) => {
          errors.push(format!("partition {}={}: {:#}", partition.partition_column, partition_key, e));
        }
      }
    }
  } else {
    for row in &junction_rows {
      match build_child_record(spec, &parent_id, row, None) {
        Ok(record) => records.push(record),
        Err(e) => errors.push(e),
      }
    }
  }

  if !records.is_empty() {
    if let Err(e) = storage.put_child_records(spec, &records) {
      errors.push(format!("{:#}", e));
    }
  }

  Ok(ChildFetch { records, errors })
}

type EnrichmentIndex<'a> = (&'a crate::entities::PartitionSpec, &'a HashMap<String, &'a Value>);

fn build_child_record(
  spec: &ChildTableSpec,
  parent_id: &str,
  row: &Value,
  enrichment: Option<EnrichmentIndex<'_>>,
) -> std::result::Result<ChildRecord, String> {
  let obj = row
    .as_object()
    .ok_or_else(|| format!("junction row for '{}' is not an object", spec.table_type))?;

  let id = obj
    .get("id")
    .map(json_to_string)
    .ok_or_else(|| format!("junction row for '{}' has no id", spec.table_type))?;

  // Everything except the id and the parent reference is source-specific
  let mut additional = serde_json::Map::new();
  for (key, value) in obj {
    if key == "id" || key == spec.parent_column {
      continue;
    }
    additional.insert(key.clone(), value.clone());
  }

  if let Some((partition, by_id)) = enrichment {
    if let Some(ref_id) = obj.get(partition.ref_column).map(json_to_string) {
      if let Some(detail) = by_id.get(&ref_id) {
        additional.insert(partition.merge_key.to_string(), (*detail).clone());
      }
    }
  }

  let additional = Value::Object(additional);
  validate_additional(spec.table_type, &additional)?;

  Ok(ChildRecord {
    id,
    table_type: spec.table_type.to_string(),
    parent_id: parent_id.to_string(),
    additional,
    cached_at: now_ms(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::entities::{Breed, Pet};
  use crate::store::testutil::MockRemote;
  use crate::store::traits::CacheSource;
  use serde_json::json;

  fn store(remote: Arc<MockRemote>) -> EntityStore<MockRemote> {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    EntityStore::new(
      remote,
      storage,
      Arc::new(SyncBridge::new()),
      &CacheConfig::default(),
      100,
    )
  }

  fn seed_litter_l1(remote: &MockRemote) {
    remote.seed(
      "pet_in_litter",
      vec![
        json!({"id": "j1", "litter_id": "L1", "pet_id": "p1", "breed_id": "B1"}),
        json!({"id": "j2", "litter_id": "L1", "pet_id": "p2", "breed_id": "B1"}),
        json!({"id": "j3", "litter_id": "L1", "pet_id": "p3", "breed_id": "B2"}),
      ],
    );
    remote.seed(
      "pets",
      vec![
        json!({"id": "p1", "name": "Aka", "breed_id": "B1"}),
        json!({"id": "p2", "name": "Aki", "breed_id": "B1"}),
        json!({"id": "p3", "name": "Ben", "breed_id": "B2"}),
      ],
    );
  }

  #[tokio::test]
  async fn child_fetch_prunes_partitions_and_enriches() {
    let remote = Arc::new(MockRemote::new());
    seed_litter_l1(&remote);
    let store = store(remote.clone());

    let page = store
      .load_child_records("L1", "pet_in_litter", ChildOptions::default())
      .await
      .unwrap();

    // One junction query, one enrichment query per breed partition
    assert_eq!(remote.selects_for("pet_in_litter"), 1);
    assert_eq!(remote.selects_for("pets"), 2);

    assert_eq!(page.data.len(), 3);
    assert!(page.errors.is_empty());
    let aka = page.data.iter().find(|r| r.id == "j1").unwrap();
    assert_eq!(aka.additional["pet"]["name"], json!("Aka"));
    assert_eq!(aka.parent_id, "L1");
  }

  #[tokio::test]
  async fn concurrent_same_key_loads_are_coalesced() {
    let remote = Arc::new(MockRemote::new());
    seed_litter_l1(&remote);
    let store = store(remote.clone());

    let (a, b) = tokio::join!(
      store.load_child_records("L1", "pet_in_litter", ChildOptions::default()),
      store.load_child_records("L1", "pet_in_litter", ChildOptions::default()),
    );

    assert_eq!(a.unwrap().data.len(), 3);
    assert_eq!(b.unwrap().data.len(), 3);
    assert_eq!(remote.selects_for("pet_in_litter"), 1);
  }

  #[tokio::test]
  async fn second_load_is_served_from_cache() {
    let remote = Arc::new(MockRemote::new());
    seed_litter_l1(&remote);
    let store = store(remote.clone());

    let first = store
      .load_child_records("L1", "pet_in_litter", ChildOptions::default())
      .await
      .unwrap();
    assert_eq!(first.source, CacheSource::Remote);

    let second = store
      .load_child_records("L1", "pet_in_litter", ChildOptions::default())
      .await
      .unwrap();
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(second.data.len(), 3);
    assert_eq!(remote.selects_for("pet_in_litter"), 1);
  }

  #[tokio::test]
  async fn pruned_fetch_matches_unpartitioned_id_set() {
    let remote = Arc::new(MockRemote::new());
    seed_litter_l1(&remote);
    let store = store(remote.clone());

    let pruned = store
      .load_child_records("L1", "pet_in_litter", ChildOptions::default())
      .await
      .unwrap();
    let mut pruned_ids: Vec<String> = pruned.data.iter().map(|r| r.id.clone()).collect();
    pruned_ids.sort();

    // The same filter as a single unpartitioned query
    let raw = remote
      .select(SelectQuery::new("pet_in_litter").filter(Filter::eq("litter_id", "L1")))
      .await
      .unwrap();
    let mut raw_ids: Vec<String> = raw
      .iter()
      .map(|r| r["id"].as_str().unwrap().to_string())
      .collect();
    raw_ids.sort();

    assert_eq!(pruned_ids, raw_ids);
  }

  #[tokio::test]
  async fn logic_error_child_fetch_surfaces_without_flipping_offline() {
    let remote = Arc::new(MockRemote::new());
    // "pet_services" never seeded: the junction query fails with a logic error
    let store = store(remote.clone());

    let result = store
      .load_child_records("p1", "pet_service", ChildOptions::default())
      .await;

    assert!(result.is_err());
    assert!(store.bridge.is_online());

    // The gate untouched, later reads still go to the remote
    remote.seed("breeds", vec![json!({"id": "b1", "name": "Samoyed"})]);
    let page = store.load_entities::<Breed>(ListOptions::default()).await.unwrap();
    assert_eq!(page.source, CacheSource::Remote);
  }

  #[tokio::test]
  async fn transport_error_child_fetch_degrades_to_offline() {
    let remote = Arc::new(MockRemote::new());
    seed_litter_l1(&remote);
    remote.fail_table("pet_in_litter");
    let store = store(remote.clone());

    let page = store
      .load_child_records("L1", "pet_in_litter", ChildOptions::default())
      .await
      .unwrap();

    assert_eq!(page.source, CacheSource::Offline);
    assert_eq!(page.errors.len(), 1);
    assert!(store.bridge.is_offline());
  }

  #[test]
  fn child_ordering_honors_direction() {
    let record = |id: &str, name: &str| ChildRecord {
      id: id.to_string(),
      table_type: "pet_in_litter".to_string(),
      parent_id: "L1".to_string(),
      additional: json!({"pet_id": id, "breed_id": "b1", "name": name}),
      cached_at: now_ms(),
    };
    let records = vec![record("j1", "Aka"), record("j2", "Ben"), record("j3", "Aki")];

    let opts = ChildOptions {
      order_by: Some("name".to_string()),
      descending: true,
      ..Default::default()
    };
    let sorted = apply_child_options(records, &opts);
    let names: Vec<&str> = sorted
      .iter()
      .map(|r| r.additional["name"].as_str().unwrap())
      .collect();
    assert_eq!(names, vec!["Ben", "Aki", "Aka"]);
  }

  #[tokio::test]
  async fn one_failed_partition_keeps_the_others() {
    let remote = Arc::new(MockRemote::new());
    seed_litter_l1(&remote);
    remote.fail_matching("pets", "breed_id", "B2");
    let store = store(remote.clone());

    let page = store
      .load_child_records("L1", "pet_in_litter", ChildOptions::default())
      .await
      .unwrap();

    assert_eq!(page.data.len(), 2);
    assert_eq!(page.errors.len(), 1);
    assert!(page.errors[0].contains("breed_id=B2"));
  }

  #[tokio::test]
  async fn list_read_caches_until_forced() {
    let remote = Arc::new(MockRemote::new());
    remote.seed(
      "breeds",
      vec![
        json!({"id": "b1", "name": "Samoyed"}),
        json!({"id": "b2", "name": "Akita"}),
      ],
    );
    let store = store(remote.clone());

    let first = store.load_entities::<Breed>(ListOptions::default()).await.unwrap();
    assert_eq!(first.source, CacheSource::Remote);
    assert_eq!(first.data.len(), 2);
    assert_eq!(remote.selects_for("breeds"), 1);

    let second = store.load_entities::<Breed>(ListOptions::default()).await.unwrap();
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(remote.selects_for("breeds"), 1);

    let forced = store
      .load_entities::<Breed>(ListOptions::default().force())
      .await
      .unwrap();
    assert_eq!(forced.source, CacheSource::Remote);
    assert_eq!(remote.selects_for("breeds"), 2);
  }

  #[tokio::test]
  async fn offline_list_read_serves_cache() {
    let remote = Arc::new(MockRemote::new());
    remote.seed("breeds", vec![json!({"id": "b1", "name": "Samoyed"})]);
    let store = store(remote.clone());

    store
      .load_entities::<Breed>(ListOptions::default())
      .await
      .unwrap();

    store.bridge.set_online(false);
    let page = store
      .load_entities::<Breed>(ListOptions::default().force())
      .await
      .unwrap();
    assert_eq!(page.source, CacheSource::Offline);
    assert_eq!(page.data.len(), 1);
    assert_eq!(remote.selects_for("breeds"), 1);
  }

  #[tokio::test]
  async fn filters_apply_to_the_local_view() {
    let remote = Arc::new(MockRemote::new());
    remote.seed(
      "pets",
      vec![
        json!({"id": "p1", "name": "Aka", "breed_id": "B1"}),
        json!({"id": "p2", "name": "Ben", "breed_id": "B2"}),
      ],
    );
    let store = store(remote.clone());

    let page = store
      .load_entities::<Pet>(ListOptions::default().filter(Filter::eq("breed_id", "B1")))
      .await
      .unwrap();

    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].id, "p1");
  }

  #[tokio::test]
  async fn force_sync_is_best_effort() {
    let remote = Arc::new(MockRemote::new());
    remote.seed("breeds", vec![]);
    let store = store(remote.clone());

    let good = Breed {
      id: "b1".to_string(),
      name: "Samoyed".to_string(),
      fci_group: None,
      created_at: None,
      updated_at: Some("2026-01-01T00:00:00Z".to_string()),
      deleted: false,
    };
    let bad = Breed {
      id: "b2".to_string(),
      name: "Akita".to_string(),
      fci_group: None,
      created_at: None,
      updated_at: Some("2026-01-01T00:00:00Z".to_string()),
      deleted: false,
    };
    let doomed = Breed {
      id: "b3".to_string(),
      name: "Shiba".to_string(),
      fci_group: None,
      created_at: None,
      updated_at: Some("2026-01-01T00:00:00Z".to_string()),
      deleted: false,
    };

    store.put_entity(&good).unwrap();
    store.put_entity(&bad).unwrap();
    store.put_entity(&doomed).unwrap();
    store.delete_entity::<Breed>("b3").unwrap();
    remote.fail_upsert_of("b2");

    let report = store.force_sync().await.unwrap();
    assert_eq!(report.synced, 2);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("b2"));

    assert_eq!(remote.upserted_ids("breeds"), vec!["b1".to_string()]);
    assert_eq!(remote.deleted_ids("breeds"), vec!["b3".to_string()]);

    // The failed record is still pending for the next pass
    let pending = store.storage.pending_rows::<Breed>().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].entity.id, "b2");
  }
}
