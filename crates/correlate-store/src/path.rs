//! Dotted field paths (`reading.sensor.id`, `statusHistory.0.endTime`).

use serde_json::{Map, Value};

/// Resolve a dotted path with plain navigation.
///
/// Numeric segments index into arrays. Missing fields yield `None`.
pub fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
  let mut current = doc;
  for segment in path.split('.') {
    current = match current {
      Value::Object(map) => map.get(segment)?,
      Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
      _ => return None,
    };
  }
  Some(current)
}

/// Resolve a dotted path the way filters see it.
///
/// When an array is met and the next segment is not an index, the remaining
/// path is applied to every element, so `items.sku` reaches the `sku` of each
/// item. Returns every value reached; an empty result means the field is
/// missing.
pub fn lookup_path<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
  let segments: Vec<&str> = path.split('.').collect();
  let mut out = Vec::new();
  collect(doc, &segments, &mut out);
  out
}

fn collect<'a>(current: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
  let Some((head, rest)) = segments.split_first() else {
    out.push(current);
    return;
  };

  match current {
    Value::Object(map) => {
      if let Some(next) = map.get(*head) {
        collect(next, rest, out);
      }
    }
    Value::Array(items) => {
      if let Ok(index) = head.parse::<usize>() {
        if let Some(next) = items.get(index) {
          collect(next, rest, out);
        }
      } else {
        for item in items {
          if item.is_object() {
            collect(item, segments, out);
          }
        }
      }
    }
    _ => {}
  }
}

/// Set a dotted path, creating intermediate objects as needed.
pub fn set_path(doc: &mut Value, path: &str, value: Value) {
  let segments: Vec<&str> = path.split('.').collect();
  set_segments(doc, &segments, value);
}

fn set_segments(current: &mut Value, segments: &[&str], value: Value) {
  let Some((head, rest)) = segments.split_first() else {
    *current = value;
    return;
  };

  if let Value::Array(items) = current
    && let Ok(index) = head.parse::<usize>()
  {
    if index < items.len() {
      set_segments(&mut items[index], rest, value);
    } else if index == items.len() {
      let mut slot = Value::Null;
      set_segments(&mut slot, rest, value);
      items.push(slot);
    }
    return;
  }

  if !current.is_object() {
    *current = Value::Object(Map::new());
  }
  if let Value::Object(map) = current {
    let entry = map.entry(head.to_string()).or_insert(Value::Null);
    if rest.is_empty() {
      *entry = value;
    } else {
      set_segments(entry, rest, value);
    }
  }
}

/// Remove a dotted path. Returns the removed value.
pub(crate) fn remove_path(doc: &mut Value, path: &str) -> Option<Value> {
  let (parent_path, last) = match path.rsplit_once('.') {
    Some((parent, last)) => (Some(parent), last),
    None => (None, path),
  };

  let parent = match parent_path {
    Some(p) => get_path_mut(doc, p)?,
    None => doc,
  };

  match parent {
    Value::Object(map) => map.shift_remove(last),
    _ => None,
  }
}

fn get_path_mut<'a>(doc: &'a mut Value, path: &str) -> Option<&'a mut Value> {
  let mut current = doc;
  for segment in path.split('.') {
    current = match current {
      Value::Object(map) => map.get_mut(segment)?,
      Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
      _ => return None,
    };
  }
  Some(current)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_get_path_with_index() {
    let doc = json!({ "history": [{ "status": "pending" }, { "status": "executing" }] });
    assert_eq!(get_path(&doc, "history.1.status"), Some(&json!("executing")));
    assert_eq!(get_path(&doc, "history.2.status"), None);
    assert_eq!(get_path(&doc, "history.status"), None);
  }

  #[test]
  fn test_lookup_path_fans_out_over_arrays() {
    let doc = json!({
      "schemas": [
        { "pipelineStatement": "p1" },
        { "pipelineStatement": "p2" },
        { "other": true }
      ]
    });
    let found = lookup_path(&doc, "schemas.pipelineStatement");
    assert_eq!(found, vec![&json!("p1"), &json!("p2")]);
    assert!(lookup_path(&doc, "missing.field").is_empty());
  }

  #[test]
  fn test_set_path_creates_intermediates() {
    let mut doc = json!({ "a": 1 });
    set_path(&mut doc, "b.c", json!(2));
    assert_eq!(doc, json!({ "a": 1, "b": { "c": 2 } }));

    let mut doc = json!({ "items": [{ "x": 1 }] });
    set_path(&mut doc, "items.0.x", json!(5));
    assert_eq!(doc, json!({ "items": [{ "x": 5 }] }));
  }

  #[test]
  fn test_remove_path() {
    let mut doc = json!({ "a": { "b": 1, "c": 2 } });
    assert_eq!(remove_path(&mut doc, "a.b"), Some(json!(1)));
    assert_eq!(doc, json!({ "a": { "c": 2 } }));
    assert_eq!(remove_path(&mut doc, "a.zzz"), None);
  }
}
