use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::memory::ensure_id;
use crate::{
  DocumentStore, FindOptions, StoreError, UpdateResult, apply_update, finish_find, matches,
  run_pipeline,
};

/// SQLite-based document store.
///
/// Each document is stored as a JSON body keyed by `(collection, doc_id)`.
/// Queries load the collection in insertion order and run through the shared
/// evaluator.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(&self.pool).await
  }

  async fn load(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError> {
    let mut conn = self.pool.acquire().await?;
    load_rows(&mut conn, collection).await
  }

  async fn matching(&self, collection: &str, filter: &Value) -> Result<Vec<Value>, StoreError> {
    let mut out = Vec::new();
    for (_, doc) in self.load(collection).await? {
      if matches(&doc, filter)? {
        out.push(doc);
      }
    }
    Ok(out)
  }

  /// Read-modify-write under the write lock, so concurrent writers queue on
  /// the busy timeout instead of failing to upgrade a read transaction.
  async fn update(
    &self,
    collection: &str,
    filter: &Value,
    update: &Value,
    first_only: bool,
  ) -> Result<UpdateResult, StoreError> {
    let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
    let mut result = UpdateResult::default();

    for (doc_id, mut doc) in load_rows(&mut tx, collection).await? {
      if !matches(&doc, filter)? {
        continue;
      }
      result.matched_count += 1;
      if apply_update(&mut doc, update)? {
        sqlx::query(
          r#"
            UPDATE documents
            SET body = ?
            WHERE collection = ? AND doc_id = ?
            "#,
        )
        .bind(serde_json::to_string(&doc)?)
        .bind(collection)
        .bind(&doc_id)
        .execute(&mut *tx)
        .await?;
        result.modified_count += 1;
      }
      if first_only {
        break;
      }
    }

    tx.commit().await?;
    Ok(result)
  }
}

async fn load_rows(
  conn: &mut SqliteConnection,
  collection: &str,
) -> Result<Vec<(String, Value)>, StoreError> {
  let rows = sqlx::query(
    r#"
      SELECT doc_id, body
      FROM documents
      WHERE collection = ?
      ORDER BY seq
      "#,
  )
  .bind(collection)
  .fetch_all(&mut *conn)
  .await?;

  rows
    .into_iter()
    .map(|row| {
      let doc_id: String = row.try_get("doc_id")?;
      let body: String = row.try_get("body")?;
      Ok((doc_id, serde_json::from_str(&body)?))
    })
    .collect()
}

#[async_trait]
impl DocumentStore for SqliteStore {
  async fn find_one(
    &self,
    collection: &str,
    filter: &Value,
    options: FindOptions,
  ) -> Result<Option<Value>, StoreError> {
    let options = FindOptions {
      limit: Some(1),
      ..options
    };
    Ok(self.find(collection, filter, options).await?.into_iter().next())
  }

  async fn find(
    &self,
    collection: &str,
    filter: &Value,
    options: FindOptions,
  ) -> Result<Vec<Value>, StoreError> {
    let docs = self.matching(collection, filter).await?;
    Ok(finish_find(docs, &options))
  }

  async fn aggregate(&self, collection: &str, pipeline: &[Value]) -> Result<Vec<Value>, StoreError> {
    let docs = self.load(collection).await?.into_iter().map(|(_, d)| d).collect();
    run_pipeline(docs, pipeline)
  }

  async fn count_documents(&self, collection: &str, filter: &Value) -> Result<u64, StoreError> {
    Ok(self.matching(collection, filter).await?.len() as u64)
  }

  async fn insert_one(&self, collection: &str, document: Value) -> Result<String, StoreError> {
    let mut document = document;
    if !document.is_object() {
      return Err(StoreError::InvalidDocument(
        "documents must be JSON objects".into(),
      ));
    }
    let id = ensure_id(&mut document);

    let inserted = sqlx::query(
      r#"
        INSERT INTO documents (collection, doc_id, body)
        VALUES (?, ?, ?)
        "#,
    )
    .bind(collection)
    .bind(&id)
    .bind(serde_json::to_string(&document)?)
    .execute(&self.pool)
    .await;

    match inserted {
      Ok(_) => Ok(id),
      Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(StoreError::DuplicateKey(id)),
      Err(e) => Err(e.into()),
    }
  }

  async fn update_one(
    &self,
    collection: &str,
    filter: &Value,
    update: &Value,
  ) -> Result<UpdateResult, StoreError> {
    self.update(collection, filter, update, true).await
  }

  async fn update_many(
    &self,
    collection: &str,
    filter: &Value,
    update: &Value,
  ) -> Result<UpdateResult, StoreError> {
    self.update(collection, filter, update, false).await
  }

  async fn delete_one(&self, collection: &str, filter: &Value) -> Result<u64, StoreError> {
    let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
    let mut deleted = 0;
    for (doc_id, doc) in load_rows(&mut tx, collection).await? {
      if matches(&doc, filter)? {
        deleted = sqlx::query("DELETE FROM documents WHERE collection = ? AND doc_id = ?")
          .bind(collection)
          .bind(&doc_id)
          .execute(&mut *tx)
          .await?
          .rows_affected();
        break;
      }
    }
    tx.commit().await?;
    Ok(deleted)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
  use std::sync::Arc;

  async fn store() -> SqliteStore {
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .connect("sqlite::memory:")
      .await
      .unwrap();
    let store = SqliteStore::new(pool);
    store.migrate().await.unwrap();
    store
  }

  #[tokio::test]
  async fn test_insert_and_find_preserves_order() {
    let store = store().await;
    store
      .insert_one("Readings", json!({ "_id": "r2", "entityId": "e1", "value": 2 }))
      .await
      .unwrap();
    store
      .insert_one("Readings", json!({ "_id": "r1", "entityId": "e1", "value": 1 }))
      .await
      .unwrap();
    store
      .insert_one("Readings", json!({ "_id": "r3", "entityId": "e2", "value": 3 }))
      .await
      .unwrap();

    let docs = store
      .find("Readings", &json!({ "entityId": "e1" }), FindOptions::default())
      .await
      .unwrap();
    let ids: Vec<_> = docs.iter().map(|d| d["_id"].clone()).collect();
    assert_eq!(ids, vec![json!("r2"), json!("r1")]);
  }

  #[tokio::test]
  async fn test_duplicate_id_is_rejected() {
    let store = store().await;
    store.insert_one("c", json!({ "_id": "a" })).await.unwrap();
    let err = store.insert_one("c", json!({ "_id": "a" })).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateKey(_)));
    store.insert_one("other", json!({ "_id": "a" })).await.unwrap();
  }

  #[tokio::test]
  async fn test_conditional_update_and_delete() {
    let store = store().await;
    store
      .insert_one("i", json!({ "_id": "x", "heartbeatActive": true, "lastHeartbeat": 1 }))
      .await
      .unwrap();

    let filter = json!({ "_id": "x", "heartbeatActive": true });
    let result = store
      .update_one("i", &filter, &json!({ "$set": { "lastHeartbeat": 5 } }))
      .await
      .unwrap();
    assert_eq!(result.matched_count, 1);

    store
      .update_one("i", &json!({ "_id": "x" }), &json!({ "$set": { "heartbeatActive": false } }))
      .await
      .unwrap();
    let result = store
      .update_one("i", &filter, &json!({ "$set": { "lastHeartbeat": 9 } }))
      .await
      .unwrap();
    assert_eq!(result.matched_count, 0);

    let doc = store
      .find_one("i", &json!({ "_id": "x" }), FindOptions::default())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(doc["lastHeartbeat"], json!(5));

    assert_eq!(store.delete_one("i", &json!({ "_id": "x" })).await.unwrap(), 1);
    assert_eq!(store.count_documents("i", &json!({})).await.unwrap(), 0);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_increments_are_serialized() {
    let dir = tempfile::tempdir().unwrap();
    let options = SqliteConnectOptions::new()
      .filename(dir.path().join("store.db"))
      .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
      .max_connections(8)
      .connect_with(options)
      .await
      .unwrap();
    let store = Arc::new(SqliteStore::new(pool));
    store.migrate().await.unwrap();
    store.insert_one("c", json!({ "_id": "counter", "n": 0 })).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..40 {
      let store = store.clone();
      handles.push(tokio::spawn(async move {
        store
          .update_one("c", &json!({ "_id": "counter" }), &json!({ "$inc": { "n": 1 } }))
          .await
      }));
    }
    let mut errors = 0;
    for handle in handles {
      if handle.await.unwrap().is_err() {
        errors += 1;
      }
    }
    assert_eq!(errors, 0);

    let doc = store
      .find_one("c", &json!({ "_id": "counter" }), FindOptions::default())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(doc["n"], json!(40));

    store
      .insert_one("c", json!({ "_id": "a" }))
      .await
      .unwrap();
    let deletes = (0..4).map(|_| {
      let store = store.clone();
      tokio::spawn(async move { store.delete_one("c", &json!({ "_id": "a" })).await })
    });
    let mut deleted = 0;
    for handle in deletes.collect::<Vec<_>>() {
      deleted += handle.await.unwrap().unwrap();
    }
    assert_eq!(deleted, 1);
  }

  #[tokio::test]
  async fn test_aggregate_over_sqlite() {
    let store = store().await;
    for v in [1, 2, 3] {
      store.insert_one("n", json!({ "v": v })).await.unwrap();
    }
    let out = store
      .aggregate("n", &[json!({ "$group": { "_id": null, "total": { "$sum": "$v" } } })])
      .await
      .unwrap();
    assert_eq!(out, vec![json!({ "_id": null, "total": 6 })]);
  }
}
