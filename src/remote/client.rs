//! Remote query API client.
//!
//! The registry backend exposes PostgREST-style endpoints: column-projected,
//! filtered, paginated reads per table, plus row-level upsert and delete for
//! the push-sync path. Authentication is a bearer credential configured out
//! of band.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::sync::Arc;
use url::Url;

use crate::config::RemoteConfig;

use super::bridge::SyncBridge;

/// A filter predicate on a remote table.
#[derive(Debug, Clone)]
pub enum Filter {
  Eq { column: String, value: String },
  In { column: String, values: Vec<String> },
}

impl Filter {
  pub fn eq(column: &str, value: &str) -> Self {
    Self::Eq {
      column: column.to_string(),
      value: value.to_string(),
    }
  }

  pub fn is_in(column: &str, values: Vec<String>) -> Self {
    Self::In {
      column: column.to_string(),
      values,
    }
  }
}

/// A scoped remote read: projection + filters + pagination.
#[derive(Debug, Clone)]
pub struct SelectQuery {
  pub table: String,
  /// Column projection; None selects everything
  pub columns: Option<Vec<String>>,
  pub filters: Vec<Filter>,
  pub order_by: Option<String>,
  pub descending: bool,
  pub limit: Option<u32>,
  pub offset: Option<u32>,
}

impl SelectQuery {
  pub fn new(table: &str) -> Self {
    Self {
      table: table.to_string(),
      columns: None,
      filters: Vec::new(),
      order_by: None,
      descending: false,
      limit: None,
      offset: None,
    }
  }

  pub fn columns(mut self, columns: Vec<String>) -> Self {
    self.columns = Some(columns);
    self
  }

  pub fn filter(mut self, filter: Filter) -> Self {
    self.filters.push(filter);
    self
  }

  pub fn order_by(mut self, column: &str, descending: bool) -> Self {
    self.order_by = Some(column.to_string());
    self.descending = descending;
    self
  }

  pub fn limit(mut self, limit: u32) -> Self {
    self.limit = Some(limit);
    self
  }

  pub fn offset(mut self, offset: u32) -> Self {
    self.offset = Some(offset);
    self
  }
}

/// Seam between the stores and the remote backend.
///
/// Methods return owned boxed futures so callers can share one in-flight
/// fetch between coalesced requests; implementations clone their cheap
/// internals into the future.
pub trait RemoteSource: Send + Sync + 'static {
  /// Execute a scoped read and return the raw rows.
  fn select(&self, query: SelectQuery) -> BoxFuture<'static, Result<Vec<Value>>>;

  /// Insert-or-update rows by primary key.
  fn upsert(&self, table: String, rows: Vec<Value>) -> BoxFuture<'static, Result<()>>;

  /// Delete one row by id.
  fn delete(&self, table: String, id: String) -> BoxFuture<'static, Result<()>>;
}

/// HTTP client for the registry backend.
#[derive(Clone)]
pub struct RemoteClient {
  http: reqwest::Client,
  base: Url,
  rest_prefix: String,
  api_key: String,
  bridge: Arc<SyncBridge>,
}

impl RemoteClient {
  pub fn new(config: &RemoteConfig, api_key: String, bridge: Arc<SyncBridge>) -> Result<Self> {
    let mut base = Url::parse(&config.url)
      .map_err(|e| eyre!("Invalid remote URL '{}': {}", config.url, e))?;

    // Url::join treats the last segment of a slash-less path as a file and
    // drops it, so "https://host/api" would lose "/api"
    if !base.path().ends_with('/') {
      base.set_path(&format!("{}/", base.path()));
    }

    let http = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self {
      http,
      base,
      rest_prefix: config.rest_prefix.clone(),
      api_key,
      bridge,
    })
  }

  fn table_url(&self, table: &str) -> Result<Url> {
    self
      .base
      .join(&format!("{}/{}", self.rest_prefix, table))
      .map_err(|e| eyre!("Invalid table endpoint '{}': {}", table, e))
  }

  fn select_url(&self, query: &SelectQuery) -> Result<Url> {
    let mut url = self.table_url(&query.table)?;

    {
      let mut pairs = url.query_pairs_mut();
      if let Some(columns) = &query.columns {
        pairs.append_pair("select", &columns.join(","));
      }
      for filter in &query.filters {
        match filter {
          Filter::Eq { column, value } => {
            pairs.append_pair(column, &format!("eq.{}", value));
          }
          Filter::In { column, values } => {
            pairs.append_pair(column, &format!("in.({})", values.join(",")));
          }
        }
      }
      if let Some(order_by) = &query.order_by {
        let direction = if query.descending { "desc" } else { "asc" };
        pairs.append_pair("order", &format!("{}.{}", order_by, direction));
      }
      if let Some(limit) = query.limit {
        pairs.append_pair("limit", &limit.to_string());
      }
      if let Some(offset) = query.offset {
        pairs.append_pair("offset", &offset.to_string());
      }
    }

    Ok(url)
  }

  async fn run_select(self, query: SelectQuery) -> Result<Vec<Value>> {
    let url = self.select_url(&query)?;

    let outcome = async {
      let response = self
        .http
        .get(url)
        .header("apikey", &self.api_key)
        .bearer_auth(&self.api_key)
        .send()
        .await
        .map_err(|e| eyre!(e))?;

      let response = response.error_for_status().map_err(|e| eyre!(e))?;
      let rows: Vec<Value> = response.json().await.map_err(|e| eyre!(e))?;
      Ok::<_, color_eyre::Report>(rows)
    }
    .await;

    match outcome {
      Ok(rows) => {
        self.bridge.set_online(true);
        Ok(rows)
      }
      Err(report) => {
        self.bridge.observe(&report);
        Err(report.wrap_err(format!("Failed to fetch rows from '{}'", query.table)))
      }
    }
  }

  async fn run_upsert(self, table: String, rows: Vec<Value>) -> Result<()> {
    let url = self.table_url(&table)?;

    let outcome = async {
      let response = self
        .http
        .post(url)
        .header("apikey", &self.api_key)
        .bearer_auth(&self.api_key)
        .header("Prefer", "resolution=merge-duplicates")
        .json(&rows)
        .send()
        .await
        .map_err(|e| eyre!(e))?;

      response.error_for_status().map_err(|e| eyre!(e))?;
      Ok::<_, color_eyre::Report>(())
    }
    .await;

    match outcome {
      Ok(()) => {
        self.bridge.set_online(true);
        Ok(())
      }
      Err(report) => {
        self.bridge.observe(&report);
        Err(report.wrap_err(format!("Failed to upsert rows into '{}'", table)))
      }
    }
  }

  async fn run_delete(self, table: String, id: String) -> Result<()> {
    let mut url = self.table_url(&table)?;
    url
      .query_pairs_mut()
      .append_pair("id", &format!("eq.{}", id));

    let outcome = async {
      let response = self
        .http
        .delete(url)
        .header("apikey", &self.api_key)
        .bearer_auth(&self.api_key)
        .send()
        .await
        .map_err(|e| eyre!(e))?;

      response.error_for_status().map_err(|e| eyre!(e))?;
      Ok::<_, color_eyre::Report>(())
    }
    .await;

    match outcome {
      Ok(()) => {
        self.bridge.set_online(true);
        Ok(())
      }
      Err(report) => {
        self.bridge.observe(&report);
        Err(report.wrap_err(format!("Failed to delete row '{}' from '{}'", id, table)))
      }
    }
  }
}

impl RemoteSource for RemoteClient {
  fn select(&self, query: SelectQuery) -> BoxFuture<'static, Result<Vec<Value>>> {
    self.clone().run_select(query).boxed()
  }

  fn upsert(&self, table: String, rows: Vec<Value>) -> BoxFuture<'static, Result<()>> {
    self.clone().run_upsert(table, rows).boxed()
  }

  fn delete(&self, table: String, id: String) -> BoxFuture<'static, Result<()>> {
    self.clone().run_delete(table, id).boxed()
  }
}
