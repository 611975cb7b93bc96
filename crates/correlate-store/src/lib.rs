//! Correlate Store
//!
//! This crate provides the document store trait the correlation engine runs
//! against, plus two implementations. Documents are JSON objects grouped in
//! named collections and addressed by an opaque `_id`.
//!
//! The [`DocumentStore`] trait defines operations for:
//! - Point and multi-document queries with projection, sort, skip and limit
//! - Aggregation pipelines
//! - Counting, inserting, updating and deleting documents
//!
//! Query semantics (filters, projections, updates, aggregation stages) live in
//! one evaluator shared by [`MemoryStore`] and [`SqliteStore`], so both
//! backends answer the same query the same way.

mod aggregate;
mod compare;
mod filter;
mod memory;
mod path;
mod projection;
mod sqlite;
mod update;

pub use aggregate::run_pipeline;
pub use compare::{compare_values, values_equal};
pub use filter::matches;
pub use memory::MemoryStore;
pub use path::{get_path, lookup_path, set_path};
pub use projection::{project, sort_documents};
pub use sqlite::SqliteStore;
pub use update::apply_update;

use async_trait::async_trait;
use serde_json::Value;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A filter, update or aggregation stage could not be evaluated.
  #[error("invalid query: {0}")]
  InvalidQuery(String),

  /// A document with the same `_id` already exists in the collection.
  #[error("duplicate key: {0}")]
  DuplicateKey(String),

  /// Documents must be JSON objects.
  #[error("invalid document: {0}")]
  InvalidDocument(String),

  /// A stored document could not be decoded.
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),
}

/// Options for `find` and `find_one`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
  pub projection: Option<Value>,
  pub sort: Option<Value>,
  /// `None` or `Some(0)` means unlimited.
  pub limit: Option<u64>,
  pub skip: Option<u64>,
}

impl FindOptions {
  pub fn with_projection(projection: Option<Value>) -> Self {
    Self {
      projection,
      ..Default::default()
    }
  }
}

/// Outcome of an update operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
  pub matched_count: u64,
  pub modified_count: u64,
}

/// Collection-scoped document storage.
#[async_trait]
pub trait DocumentStore: Send + Sync {
  /// Return the first document matching `filter`, if any.
  async fn find_one(
    &self,
    collection: &str,
    filter: &Value,
    options: FindOptions,
  ) -> Result<Option<Value>, StoreError>;

  /// Return all documents matching `filter`.
  async fn find(
    &self,
    collection: &str,
    filter: &Value,
    options: FindOptions,
  ) -> Result<Vec<Value>, StoreError>;

  /// Run an aggregation pipeline over a collection.
  async fn aggregate(&self, collection: &str, pipeline: &[Value]) -> Result<Vec<Value>, StoreError>;

  /// Count documents matching `filter`.
  async fn count_documents(&self, collection: &str, filter: &Value) -> Result<u64, StoreError>;

  /// Insert a document, assigning an `_id` when absent. Returns the id.
  async fn insert_one(&self, collection: &str, document: Value) -> Result<String, StoreError>;

  /// Apply `update` to the first document matching `filter`.
  async fn update_one(
    &self,
    collection: &str,
    filter: &Value,
    update: &Value,
  ) -> Result<UpdateResult, StoreError>;

  /// Apply `update` to every document matching `filter`.
  async fn update_many(
    &self,
    collection: &str,
    filter: &Value,
    update: &Value,
  ) -> Result<UpdateResult, StoreError>;

  /// Delete the first document matching `filter`. Returns the deleted count.
  async fn delete_one(&self, collection: &str, filter: &Value) -> Result<u64, StoreError>;
}

/// Render a document `_id` as the string key used for addressing.
pub fn id_key(id: &Value) -> String {
  match id {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

/// Apply skip/limit/projection/sort from [`FindOptions`] to matched documents.
pub(crate) fn finish_find(mut docs: Vec<Value>, options: &FindOptions) -> Vec<Value> {
  if let Some(sort) = &options.sort {
    sort_documents(&mut docs, sort);
  }

  let skip = options.skip.unwrap_or(0) as usize;
  let docs = docs.into_iter().skip(skip);
  let docs: Vec<Value> = match options.limit {
    Some(limit) if limit > 0 => docs.take(limit as usize).collect(),
    _ => docs.collect(),
  };

  match &options.projection {
    Some(projection) => docs.iter().map(|d| project(d, projection)).collect(),
    None => docs,
  }
}
