//! Find projections and sorting.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::compare::compare_values;
use crate::path::{get_path, remove_path, set_path};

fn is_truthy(value: &Value) -> bool {
  match value {
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
    Value::Null => false,
    _ => true,
  }
}

/// Apply a find projection.
///
/// Inclusion mode (`{ "name": 1 }`) keeps `_id` unless it is excluded with
/// `{ "_id": 0 }`. Exclusion mode (`{ "raw": 0 }`) removes the listed paths.
/// An empty or non-object projection returns the document unchanged.
pub fn project(doc: &Value, projection: &Value) -> Value {
  let Some(spec) = projection.as_object().filter(|m| !m.is_empty()) else {
    return doc.clone();
  };

  let inclusion = spec.iter().any(|(k, v)| k != "_id" && is_truthy(v));

  if inclusion {
    let mut out = Value::Object(Map::new());
    let keep_id = spec.get("_id").is_none_or(is_truthy);
    if keep_id && let Some(id) = doc.get("_id") {
      set_path(&mut out, "_id", id.clone());
    }
    for (path, flag) in spec {
      if path == "_id" || !is_truthy(flag) {
        continue;
      }
      if let Some(value) = get_path(doc, path) {
        set_path(&mut out, path, value.clone());
      }
    }
    out
  } else {
    let mut out = doc.clone();
    for path in spec.keys() {
      remove_path(&mut out, path);
    }
    out
  }
}

/// Sort documents in place by a sort spec (`{ "ts": -1, "name": 1 }`).
///
/// Missing fields sort as `null`. The sort is stable.
pub fn sort_documents(docs: &mut [Value], sort: &Value) {
  let Some(spec) = sort.as_object() else {
    return;
  };
  let keys: Vec<(&String, bool)> = spec
    .iter()
    .map(|(k, v)| (k, v.as_f64().is_some_and(|d| d < 0.0)))
    .collect();

  docs.sort_by(|a, b| {
    for (path, descending) in &keys {
      let left = get_path(a, path).unwrap_or(&Value::Null);
      let right = get_path(b, path).unwrap_or(&Value::Null);
      let ord = compare_values(left, right);
      let ord = if *descending { ord.reverse() } else { ord };
      if ord != Ordering::Equal {
        return ord;
      }
    }
    Ordering::Equal
  });
}
