//! In-memory remote backend for store tests.

use color_eyre::{eyre::eyre, Report, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::remote::{Filter, RemoteSource, SelectQuery};

#[derive(Default)]
struct MockState {
  tables: HashMap<String, Vec<Value>>,
  failing_tables: HashSet<String>,
  failing_filters: Vec<(String, String, String)>,
  failing_upsert_ids: HashSet<String>,
  select_log: Vec<SelectQuery>,
  upsert_log: Vec<(String, Vec<Value>)>,
  delete_log: Vec<(String, String)>,
}

/// Scripted remote source: seeded tables, per-table transport failures,
/// per-row upsert failures, and full call logs.
#[derive(Clone)]
pub struct MockRemote {
  state: Arc<Mutex<MockState>>,
}

impl MockRemote {
  pub fn new() -> Self {
    Self {
      state: Arc::new(Mutex::new(MockState::default())),
    }
  }

  pub fn seed(&self, table: &str, rows: Vec<Value>) {
    self.state.lock().unwrap().tables.insert(table.to_string(), rows);
  }

  /// Make every select against this table fail at the transport level.
  pub fn fail_table(&self, table: &str) {
    self
      .state
      .lock()
      .unwrap()
      .failing_tables
      .insert(table.to_string());
  }

  /// Make selects against this table fail when they carry a matching
  /// equality filter. Used to fail one partition of a batched fetch.
  pub fn fail_matching(&self, table: &str, column: &str, value: &str) {
    self.state.lock().unwrap().failing_filters.push((
      table.to_string(),
      column.to_string(),
      value.to_string(),
    ));
  }

  /// Make upserting the row with this id fail with a logic error.
  pub fn fail_upsert_of(&self, id: &str) {
    self
      .state
      .lock()
      .unwrap()
      .failing_upsert_ids
      .insert(id.to_string());
  }

  pub fn select_count(&self) -> usize {
    self.state.lock().unwrap().select_log.len()
  }

  pub fn selects_for(&self, table: &str) -> usize {
    self
      .state
      .lock()
      .unwrap()
      .select_log
      .iter()
      .filter(|q| q.table == table)
      .count()
  }

  pub fn upserted_ids(&self, table: &str) -> Vec<String> {
    self
      .state
      .lock()
      .unwrap()
      .upsert_log
      .iter()
      .filter(|(t, _)| t == table)
      .flat_map(|(_, rows)| rows.iter())
      .filter_map(|row| row.get("id").map(value_to_string))
      .collect()
  }

  pub fn deleted_ids(&self, table: &str) -> Vec<String> {
    self
      .state
      .lock()
      .unwrap()
      .delete_log
      .iter()
      .filter(|(t, _)| t == table)
      .map(|(_, id)| id.clone())
      .collect()
  }

  fn connection_refused() -> Report {
    Report::new(std::io::Error::new(
      std::io::ErrorKind::ConnectionRefused,
      "connection refused",
    ))
  }

  fn apply(rows: &[Value], query: &SelectQuery) -> Vec<Value> {
    let mut matched: Vec<Value> = rows
      .iter()
      .filter(|row| {
        query.filters.iter().all(|filter| match filter {
          Filter::Eq { column, value } => row
            .get(column)
            .map(|v| value_to_string(v) == *value)
            .unwrap_or(false),
          Filter::In { column, values } => row
            .get(column)
            .map(|v| values.contains(&value_to_string(v)))
            .unwrap_or(false),
        })
      })
      .cloned()
      .collect();

    if let Some(offset) = query.offset {
      matched = matched.into_iter().skip(offset as usize).collect();
    }
    if let Some(limit) = query.limit {
      matched.truncate(limit as usize);
    }
    matched
  }
}

impl Default for MockRemote {
  fn default() -> Self {
    Self::new()
  }
}

fn value_to_string(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

impl RemoteSource for MockRemote {
  fn select(&self, query: SelectQuery) -> BoxFuture<'static, Result<Vec<Value>>> {
    let state = Arc::clone(&self.state);
    async move {
      // Yield so concurrent callers can observe the in-flight fetch
      tokio::time::sleep(Duration::from_millis(2)).await;

      let mut guard = state.lock().unwrap();
      guard.select_log.push(query.clone());

      if guard.failing_tables.contains(&query.table) {
        return Err(Self::connection_refused());
      }

      let filter_hit = guard.failing_filters.iter().any(|(table, column, value)| {
        *table == query.table
          && query.filters.iter().any(|f| {
            matches!(f, Filter::Eq { column: c, value: v } if c == column && v == value)
          })
      });
      if filter_hit {
        return Err(Self::connection_refused());
      }

      let rows = guard
        .tables
        .get(&query.table)
        .ok_or_else(|| eyre!("no such table '{}'", query.table))?;
      Ok(Self::apply(rows, &query))
    }
    .boxed()
  }

  fn upsert(&self, table: String, rows: Vec<Value>) -> BoxFuture<'static, Result<()>> {
    let state = Arc::clone(&self.state);
    async move {
      let mut guard = state.lock().unwrap();

      for row in &rows {
        if let Some(id) = row.get("id").map(value_to_string) {
          if guard.failing_upsert_ids.contains(&id) {
            return Err(eyre!("row '{}' failed validation", id));
          }
        }
      }

      guard.upsert_log.push((table, rows));
      Ok(())
    }
    .boxed()
  }

  fn delete(&self, table: String, id: String) -> BoxFuture<'static, Result<()>> {
    let state = Arc::clone(&self.state);
    async move {
      state.lock().unwrap().delete_log.push((table, id));
      Ok(())
    }
    .boxed()
  }
}
