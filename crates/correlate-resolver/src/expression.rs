use std::collections::BTreeSet;

use serde_json::{Map, Value};

static NO_DECLARED: BTreeSet<String> = BTreeSet::new();

const PARAMS_PREFIX: &str = "$params.";

/// What an expression can see while a pipeline runs.
#[derive(Debug, Clone, Copy)]
pub struct ResolveScope<'a> {
  /// Values produced by the steps that already ran.
  pub ctx: &'a Map<String, Value>,
  pub params: &'a Map<String, Value>,
  /// Every output key the running pipeline declares, produced or not.
  pub declared: &'a BTreeSet<String>,
}

impl<'a> ResolveScope<'a> {
  pub fn new(ctx: &'a Map<String, Value>, params: &'a Map<String, Value>) -> Self {
    Self {
      ctx,
      params,
      declared: &NO_DECLARED,
    }
  }

  pub fn with_declared(mut self, declared: &'a BTreeSet<String>) -> Self {
    self.declared = declared;
    self
  }
}

/// Resolve a value, mapping an undefined result to `null`.
pub fn resolve(value: &Value, scope: &ResolveScope<'_>) -> Value {
  resolve_value(value, scope).unwrap_or(Value::Null)
}

/// Resolve a value. `None` means the expression is undefined (a missing
/// parameter, a forward reference, or a path that leads nowhere).
///
/// Resolution never fails.
pub fn resolve_value(value: &Value, scope: &ResolveScope<'_>) -> Option<Value> {
  match value {
    Value::String(s) => resolve_string(s, scope),
    Value::Array(items) => Some(Value::Array(
      items.iter().map(|item| resolve(item, scope)).collect(),
    )),
    Value::Object(map) => Some(resolve_object(map, scope)),
    other => Some(other.clone()),
  }
}

fn resolve_string(s: &str, scope: &ResolveScope<'_>) -> Option<Value> {
  if let Some(rest) = s.strip_prefix(PARAMS_PREFIX) {
    let (name, path) = split_head(rest);
    return navigate(scope.params.get(name)?, path);
  }

  if let Some(rest) = s.strip_prefix('$')
    && !rest.starts_with('$')
  {
    let (key, path) = split_head(rest);
    if let Some(root) = scope.ctx.get(key) {
      return navigate(root, path);
    }
    if scope.declared.contains(key) {
      return None;
    }
    return Some(Value::String(s.to_string()));
  }

  if let Some(param) = scope.params.get(s) {
    return Some(param.clone());
  }

  Some(Value::String(s.to_string()))
}

fn split_head(path: &str) -> (&str, Option<&str>) {
  match path.split_once('.') {
    Some((head, rest)) => (head, Some(rest)),
    None => (path, None),
  }
}

/// Walk `path` from `root`. When an array is met, the next segment is mapped
/// over its elements, null and missing results are dropped, and the mapped
/// array is returned without descending further.
fn navigate(root: &Value, path: Option<&str>) -> Option<Value> {
  let Some(path) = path else {
    return Some(root.clone());
  };

  let mut current = root;
  for segment in path.split('.') {
    match current {
      Value::Array(items) => {
        let mapped = items
          .iter()
          .filter_map(|item| item.get(segment))
          .filter(|v| !v.is_null())
          .cloned()
          .collect();
        return Some(Value::Array(mapped));
      }
      Value::Object(map) => current = map.get(segment)?,
      _ => return None,
    }
  }
  Some(current.clone())
}

fn resolve_object(map: &Map<String, Value>, scope: &ResolveScope<'_>) -> Value {
  if let Some(key_expr) = map.get("$dynamicKey") {
    let mut out = Map::new();
    let key = match resolve_value(key_expr, scope) {
      None | Some(Value::Null) => return Value::Object(out),
      Some(Value::String(k)) => k,
      Some(other) => other.to_string(),
    };
    let value = map
      .get("$value")
      .map(|v| resolve(v, scope))
      .unwrap_or(Value::Null);
    out.insert(key, value);
    return Value::Object(out);
  }

  let mut out = Map::with_capacity(map.len());
  for (key, value) in map {
    let resolved = if key == "$in" {
      coerce_array(resolve_value(value, scope))
    } else {
      resolve(value, scope)
    };
    out.insert(key.clone(), resolved);
  }
  Value::Object(out)
}

fn coerce_array(value: Option<Value>) -> Value {
  match value {
    Some(Value::Array(items)) => Value::Array(items),
    None | Some(Value::Null) => Value::Array(Vec::new()),
    Some(scalar) => Value::Array(vec![scalar]),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn map(value: Value) -> Map<String, Value> {
    match value {
      Value::Object(m) => m,
      _ => panic!("expected an object"),
    }
  }

  #[test]
  fn test_params_and_context_references() {
    let ctx = map(json!({ "entity": { "_id": "e1", "site": { "code": "N" } } }));
    let params = map(json!({ "name": "PUMP1" }));
    let scope = ResolveScope::new(&ctx, &params);

    assert_eq!(resolve_value(&json!("$params.name"), &scope), Some(json!("PUMP1")));
    assert_eq!(resolve_value(&json!("$params.missing"), &scope), None);
    assert_eq!(resolve_value(&json!("$entity._id"), &scope), Some(json!("e1")));
    assert_eq!(resolve_value(&json!("$entity.site.code"), &scope), Some(json!("N")));
    assert_eq!(resolve_value(&json!("$entity.nope"), &scope), None);
  }

  #[test]
  fn test_bare_word_param_and_literals() {
    let ctx = Map::new();
    let params = map(json!({ "name": "PUMP1" }));
    let scope = ResolveScope::new(&ctx, &params);

    assert_eq!(resolve(&json!("name"), &scope), json!("PUMP1"));
    assert_eq!(resolve(&json!("other"), &scope), json!("other"));
    assert_eq!(resolve(&json!(42), &scope), json!(42));
    assert_eq!(resolve(&json!(null), &scope), json!(null));
  }

  #[test]
  fn test_store_field_paths_pass_through() {
    let ctx = Map::new();
    let params = Map::new();
    let scope = ResolveScope::new(&ctx, &params);

    let stage = json!({ "$group": { "_id": "$site", "total": { "$sum": "$amount" } } });
    assert_eq!(resolve(&stage, &scope), stage);
    assert_eq!(resolve(&json!("$$ROOT"), &scope), json!("$$ROOT"));
  }

  #[test]
  fn test_forward_reference_is_undefined() {
    let ctx = Map::new();
    let params = Map::new();
    let declared: BTreeSet<String> = ["readings".to_string()].into();
    let scope = ResolveScope::new(&ctx, &params).with_declared(&declared);

    assert_eq!(resolve_value(&json!("$readings.value"), &scope), None);
    assert_eq!(
      resolve(&json!({ "entityId": "$readings._id" }), &scope),
      json!({ "entityId": null })
    );
  }

  #[test]
  fn test_array_path_maps_and_stops() {
    let ctx = map(json!({
      "entities": [
        { "_id": "e1", "tags": { "a": 1 } },
        { "_id": null },
        { "name": "no id" },
        { "_id": "e3" }
      ]
    }));
    let params = Map::new();
    let scope = ResolveScope::new(&ctx, &params);

    assert_eq!(resolve(&json!("$entities._id"), &scope), json!(["e1", "e3"]));
    assert_eq!(resolve(&json!("$entities.tags.a"), &scope), json!([{ "a": 1 }]));
    assert_eq!(resolve(&json!("$entities.zzz"), &scope), json!([]));
  }

  #[test]
  fn test_in_operand_coerced_to_array() {
    let ctx = map(json!({ "entity": { "_id": "e1" } }));
    let params = Map::new();
    let scope = ResolveScope::new(&ctx, &params);

    assert_eq!(
      resolve(&json!({ "entityId": { "$in": "$entity._id" } }), &scope),
      json!({ "entityId": { "$in": ["e1"] } })
    );
    assert_eq!(
      resolve(&json!({ "entityId": { "$in": "$entity.missing" } }), &scope),
      json!({ "entityId": { "$in": [] } })
    );
    assert_eq!(
      resolve(&json!({ "$in": ["a", "b"] }), &scope),
      json!({ "$in": ["a", "b"] })
    );
  }

  #[test]
  fn test_dynamic_key() {
    let ctx = Map::new();
    let params = map(json!({ "field": "site", "value": "north" }));
    let scope = ResolveScope::new(&ctx, &params);

    assert_eq!(
      resolve(&json!({ "$dynamicKey": "$params.field", "$value": "$params.value" }), &scope),
      json!({ "site": "north" })
    );
    assert_eq!(
      resolve(&json!({ "$dynamicKey": "$params.nope", "$value": 1 }), &scope),
      json!({})
    );
  }

  #[test]
  fn test_resolution_is_deterministic() {
    let ctx = map(json!({ "a": [{ "x": 1 }, { "x": 2 }] }));
    let params = map(json!({ "p": true }));
    let scope = ResolveScope::new(&ctx, &params);
    let input = json!({ "xs": "$a.x", "p": "$params.p", "lit": ["p", "$a"] });
    assert_eq!(resolve(&input, &scope), resolve(&input, &scope));
    assert_eq!(
      resolve(&input, &scope),
      json!({ "xs": [1, 2], "p": true, "lit": [true, [{ "x": 1 }, { "x": 2 }]] })
    );
  }
}
