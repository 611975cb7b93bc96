//! Update operators.

use serde_json::Value;

use crate::StoreError;
use crate::path::{get_path, remove_path, set_path};

/// Apply an update document to `doc`.
///
/// Operator updates support `$set`, `$unset`, `$inc` and `$push` (with
/// `$each`). An update without operators replaces the document, keeping `_id`.
/// Returns whether the document changed.
pub fn apply_update(doc: &mut Value, update: &Value) -> Result<bool, StoreError> {
  let ops = update
    .as_object()
    .ok_or_else(|| StoreError::InvalidQuery("update must be an object".into()))?;

  let before = doc.clone();

  if !ops.keys().any(|k| k.starts_with('$')) {
    let id = doc.get("_id").cloned();
    let mut replacement = Value::Object(ops.clone());
    if let Some(id) = id {
      set_path(&mut replacement, "_id", id);
    }
    *doc = replacement;
    return Ok(*doc != before);
  }

  for (op, fields) in ops {
    let fields = fields
      .as_object()
      .ok_or_else(|| StoreError::InvalidQuery(format!("{} requires an object", op)))?;

    for (path, value) in fields {
      if path == "_id" {
        return Err(StoreError::InvalidQuery("_id cannot be modified".into()));
      }
      match op.as_str() {
        "$set" => set_path(doc, path, value.clone()),
        "$unset" => {
          remove_path(doc, path);
        }
        "$inc" => increment(doc, path, value)?,
        "$push" => push(doc, path, value)?,
        other => {
          return Err(StoreError::InvalidQuery(format!(
            "unsupported update operator '{}'",
            other
          )));
        }
      }
    }
  }

  Ok(*doc != before)
}

fn increment(doc: &mut Value, path: &str, by: &Value) -> Result<(), StoreError> {
  let by_num = by
    .as_f64()
    .ok_or_else(|| StoreError::InvalidQuery(format!("$inc on '{}' requires a number", path)))?;

  let next = match get_path(doc, path) {
    None | Some(Value::Null) => by.clone(),
    Some(Value::Number(current)) => match (current.as_i64(), by.as_i64()) {
      (Some(a), Some(b)) => Value::from(a + b),
      _ => serde_json::Number::from_f64(current.as_f64().unwrap_or(0.0) + by_num)
        .map(Value::Number)
        .unwrap_or(Value::Null),
    },
    Some(_) => {
      return Err(StoreError::InvalidQuery(format!(
        "cannot $inc non-numeric field '{}'",
        path
      )));
    }
  };
  set_path(doc, path, next);
  Ok(())
}

fn push(doc: &mut Value, path: &str, value: &Value) -> Result<(), StoreError> {
  let items: Vec<Value> = match value.as_object().and_then(|m| m.get("$each")) {
    Some(Value::Array(each)) => each.clone(),
    Some(_) => {
      return Err(StoreError::InvalidQuery("$each requires an array".into()));
    }
    None => vec![value.clone()],
  };

  let mut current = match get_path(doc, path) {
    None | Some(Value::Null) => Vec::new(),
    Some(Value::Array(existing)) => existing.clone(),
    Some(_) => {
      return Err(StoreError::InvalidQuery(format!(
        "cannot $push to non-array field '{}'",
        path
      )));
    }
  };
  current.extend(items);
  set_path(doc, path, Value::Array(current));
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_set_unset_inc_push() {
    let mut doc = json!({ "_id": "i1", "status": "pending", "n": 1, "history": [] });
    let changed = apply_update(
      &mut doc,
      &json!({
        "$set": { "status": "executing", "history.0": { "status": "pending" } },
        "$inc": { "n": 2 },
        "$push": { "history": { "status": "executing" } },
        "$unset": { "tmp": "" }
      }),
    )
    .unwrap();

    assert!(changed);
    assert_eq!(
      doc,
      json!({
        "_id": "i1",
        "status": "executing",
        "n": 3,
        "history": [{ "status": "pending" }, { "status": "executing" }]
      })
    );
  }

  #[test]
  fn test_push_each() {
    let mut doc = json!({ "_id": 1 });
    apply_update(&mut doc, &json!({ "$push": { "xs": { "$each": [1, 2] } } })).unwrap();
    assert_eq!(doc, json!({ "_id": 1, "xs": [1, 2] }));
  }

  #[test]
  fn test_replacement_keeps_id() {
    let mut doc = json!({ "_id": "a", "x": 1 });
    apply_update(&mut doc, &json!({ "y": 2 })).unwrap();
    assert_eq!(doc, json!({ "y": 2, "_id": "a" }));
  }

  #[test]
  fn test_id_is_immutable() {
    let mut doc = json!({ "_id": "a" });
    assert!(apply_update(&mut doc, &json!({ "$set": { "_id": "b" } })).is_err());
  }

  #[test]
  fn test_unchanged_update_reports_no_modification() {
    let mut doc = json!({ "_id": "a", "x": 1 });
    assert!(!apply_update(&mut doc, &json!({ "$set": { "x": 1 } })).unwrap());
  }
}
