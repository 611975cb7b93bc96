use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::{
  DocumentStore, FindOptions, StoreError, UpdateResult, apply_update, finish_find, id_key,
  matches, run_pipeline,
};

/// In-memory document store.
///
/// Collections keep insertion order.
#[derive(Debug, Default)]
pub struct MemoryStore {
  collections: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Seed a collection. Documents without an `_id` get one assigned.
  pub fn with_collection(mut self, name: impl Into<String>, docs: Vec<Value>) -> Self {
    let docs: Vec<Value> = docs
      .into_iter()
      .map(|mut d| {
        ensure_id(&mut d);
        d
      })
      .collect();
    self
      .collections
      .get_mut()
      .entry(name.into())
      .or_default()
      .extend(docs);
    self
  }

  async fn matching(&self, collection: &str, filter: &Value) -> Result<Vec<Value>, StoreError> {
    let collections = self.collections.read().await;
    let mut out = Vec::new();
    if let Some(docs) = collections.get(collection) {
      for doc in docs {
        if matches(doc, filter)? {
          out.push(doc.clone());
        }
      }
    }
    Ok(out)
  }

  async fn update(
    &self,
    collection: &str,
    filter: &Value,
    update: &Value,
    first_only: bool,
  ) -> Result<UpdateResult, StoreError> {
    let mut collections = self.collections.write().await;
    let mut result = UpdateResult::default();
    let Some(docs) = collections.get_mut(collection) else {
      return Ok(result);
    };

    for doc in docs.iter_mut() {
      if !matches(doc, filter)? {
        continue;
      }
      result.matched_count += 1;
      let mut next = doc.clone();
      if apply_update(&mut next, update)? {
        *doc = next;
        result.modified_count += 1;
      }
      if first_only {
        break;
      }
    }
    Ok(result)
  }
}

/// Assign a fresh `_id` when the document has none. Returns the id key.
pub(crate) fn ensure_id(doc: &mut Value) -> String {
  match doc.get("_id") {
    Some(id) if !id.is_null() => id_key(id),
    _ => {
      let id = uuid::Uuid::new_v4().to_string();
      if let Value::Object(map) = doc {
        map.insert("_id".to_string(), Value::String(id.clone()));
      }
      id
    }
  }
}

#[async_trait]
impl DocumentStore for MemoryStore {
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
    let docs = self
      .collections
      .read()
      .await
      .get(collection)
      .cloned()
      .unwrap_or_default();
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

    let mut collections = self.collections.write().await;
    let docs = collections.entry(collection.to_string()).or_default();
    if docs
      .iter()
      .any(|d| d.get("_id").is_some_and(|existing| id_key(existing) == id))
    {
      return Err(StoreError::DuplicateKey(id));
    }
    docs.push(document);
    Ok(id)
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
    let mut collections = self.collections.write().await;
    let Some(docs) = collections.get_mut(collection) else {
      return Ok(0);
    };
    let mut found = None;
    for (index, doc) in docs.iter().enumerate() {
      if matches(doc, filter)? {
        found = Some(index);
        break;
      }
    }
    Ok(match found {
      Some(index) => {
        docs.remove(index);
        1
      }
      None => 0,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn store() -> MemoryStore {
    MemoryStore::new().with_collection(
      "Entities",
      vec![
        json!({ "_id": "e1", "name": "PUMP1", "site": "north" }),
        json!({ "_id": "e2", "name": "PUMP2", "site": "south" }),
        json!({ "_id": "e3", "name": "VALVE1", "site": "north" }),
      ],
    )
  }

  #[tokio::test]
  async fn test_find_with_options() {
    let store = store();
    let docs = store
      .find(
        "Entities",
        &json!({ "site": "north" }),
        FindOptions {
          projection: Some(json!({ "name": 1, "_id": 0 })),
          sort: Some(json!({ "name": -1 })),
          ..Default::default()
        },
      )
      .await
      .unwrap();
    assert_eq!(docs, vec![json!({ "name": "VALVE1" }), json!({ "name": "PUMP1" })]);
  }

  #[tokio::test]
  async fn test_find_one_missing_collection() {
    let store = store();
    let found = store
      .find_one("Nope", &json!({}), FindOptions::default())
      .await
      .unwrap();
    assert!(found.is_none());
  }

  #[tokio::test]
  async fn test_seeded_documents_get_ids_and_accumulate() {
    let store = MemoryStore::new()
      .with_collection("c", vec![json!({ "x": 1 })])
      .with_collection("c", vec![json!({ "_id": "keep", "x": 2 })]);
    let docs = store
      .find("c", &json!({}), FindOptions::default())
      .await
      .unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0]["_id"].as_str().map(str::len), Some(36));
    assert_eq!(docs[1]["_id"], json!("keep"));
  }

  #[tokio::test]
  async fn test_insert_assigns_id_and_rejects_duplicates() {
    let store = MemoryStore::new();
    let id = store.insert_one("c", json!({ "x": 1 })).await.unwrap();
    assert_eq!(id.len(), 36);
    store.insert_one("c", json!({ "_id": "fixed" })).await.unwrap();
    let err = store.insert_one("c", json!({ "_id": "fixed" })).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateKey(_)));
    assert_eq!(store.count_documents("c", &json!({})).await.unwrap(), 2);
  }

  #[tokio::test]
  async fn test_update_one_and_many() {
    let store = store();
    let result = store
      .update_one("Entities", &json!({ "site": "north" }), &json!({ "$set": { "ok": true } }))
      .await
      .unwrap();
    assert_eq!(result, UpdateResult { matched_count: 1, modified_count: 1 });

    let result = store
      .update_many("Entities", &json!({ "site": "north" }), &json!({ "$set": { "ok": true } }))
      .await
      .unwrap();
    assert_eq!(result, UpdateResult { matched_count: 2, modified_count: 1 });
  }

  #[tokio::test]
  async fn test_failed_update_leaves_document_untouched() {
    let store = store();
    let err = store
      .update_one(
        "Entities",
        &json!({ "_id": "e1" }),
        &json!({ "$set": { "a": 1 }, "$inc": { "name": 1 } }),
      )
      .await;
    assert!(err.is_err());
    let doc = store
      .find_one("Entities", &json!({ "_id": "e1" }), FindOptions::default())
      .await
      .unwrap()
      .unwrap();
    assert!(doc.get("a").is_none());
  }

  #[tokio::test]
  async fn test_aggregate_and_delete() {
    let store = store();
    let out = store
      .aggregate(
        "Entities",
        &[json!({ "$group": { "_id": "$site", "n": { "$sum": 1 } } })],
      )
      .await
      .unwrap();
    assert_eq!(out.len(), 2);

    assert_eq!(store.delete_one("Entities", &json!({ "_id": "e2" })).await.unwrap(), 1);
    assert_eq!(store.delete_one("Entities", &json!({ "_id": "e2" })).await.unwrap(), 0);
  }
}
