//! In-memory `joinAttributes`.

use correlate_config::StepDef;
use correlate_resolver::{ResolveScope, resolve};
use correlate_store::{get_path, set_path, values_equal};
use serde_json::{Map, Value};

use crate::error::StepError;

pub(crate) fn join_attributes(step: &StepDef, scope: &ResolveScope<'_>) -> Result<Value, StepError> {
  let left = side(step.left.as_ref(), "left", scope)?;
  let right = side(step.right.as_ref(), "right", scope)?;

  let local = match &step.local_field {
    Some(Value::String(f)) if !f.is_empty() => f.as_str(),
    _ => {
      return Err(StepError::validation(
        "localField",
        "joinAttributes requires a localField name",
      ));
    }
  };
  let foreign = step
    .foreign_field
    .as_deref()
    .filter(|f| !f.is_empty())
    .ok_or_else(|| {
      StepError::validation("foreignField", "joinAttributes requires a foreignField name")
    })?;

  let mut joined: Vec<Value> = left
    .into_iter()
    .map(|record| merge(record, &right, local, foreign, step.merge_fields.as_deref()))
    .collect();

  if let Some(filter) = &step.filter {
    let filter = resolve(filter, scope);
    if let Value::Object(conditions) = filter {
      joined.retain(|record| keep(record, &conditions));
    }
  }

  if let Some(Value::Object(projection)) = &step.projection
    && !projection.is_empty()
  {
    joined = joined.iter().map(|r| include_only(r, projection)).collect();
  }

  Ok(Value::Array(joined))
}

fn side(value: Option<&Value>, field: &str, scope: &ResolveScope<'_>) -> Result<Vec<Value>, StepError> {
  match value.map(|v| resolve(v, scope)) {
    Some(Value::Array(items)) => Ok(items),
    _ => Err(StepError::validation(
      field,
      format!("{} must resolve to an array", field),
    )),
  }
}

fn merge(
  mut record: Value,
  right: &[Value],
  local: &str,
  foreign: &str,
  merge_fields: Option<&[String]>,
) -> Value {
  let Some(key) = get_path(&record, local).filter(|k| !k.is_null()).cloned() else {
    return record;
  };
  let Some(matched) = right
    .iter()
    .find(|r| get_path(r, foreign).is_some_and(|v| values_equal(v, &key)))
  else {
    return record;
  };

  match merge_fields {
    Some(fields) => {
      for field in fields {
        if let Some(value) = get_path(matched, field) {
          set_path(&mut record, field, value.clone());
        }
      }
    }
    None => {
      if let (Value::Object(target), Value::Object(source)) = (&mut record, matched) {
        for (k, v) in source {
          if !target.contains_key(k) {
            target.insert(k.clone(), v.clone());
          }
        }
      }
    }
  }
  record
}

/// Array condition means membership, anything else equality.
fn keep(record: &Value, conditions: &Map<String, Value>) -> bool {
  conditions.iter().all(|(path, expected)| {
    let actual = get_path(record, path).unwrap_or(&Value::Null);
    match expected {
      Value::Array(options) => options.iter().any(|o| values_equal(o, actual)),
      other => values_equal(other, actual),
    }
  })
}

fn include_only(record: &Value, projection: &Map<String, Value>) -> Value {
  let mut out = Value::Object(Map::new());
  for (path, flag) in projection {
    let included = match flag {
      Value::Bool(b) => *b,
      Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
      _ => false,
    };
    if included && let Some(value) = get_path(record, path) {
      set_path(&mut out, path, value.clone());
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn run(step: Value, ctx: Value) -> Result<Value, StepError> {
    let step: StepDef = serde_json::from_value(step).unwrap();
    let Value::Object(ctx) = ctx else { unreachable!() };
    let params = Map::new();
    join_attributes(&step, &ResolveScope::new(&ctx, &params))
  }

  fn ctx() -> Value {
    json!({
      "readings": [
        { "_id": "r1", "entityId": "e1", "value": 3 },
        { "_id": "r2", "entityId": "e2", "value": 5 },
        { "_id": "r3", "entityId": "e9", "value": 7 }
      ],
      "entities": [
        { "_id": "e1", "name": "PUMP1", "site": "north" },
        { "_id": "e2", "name": "PUMP2", "site": "south" },
        { "_id": "e1", "name": "DUPLICATE" }
      ]
    })
  }

  #[test]
  fn test_join_with_merge_fields_filter_and_projection() {
    let out = run(
      json!({
        "function": "joinAttributes",
        "left": "$readings",
        "right": "$entities",
        "localField": "entityId",
        "foreignField": "_id",
        "mergeFields": ["name"],
        "filter": { "name": ["PUMP1", "PUMP2"] },
        "projection": { "name": 1, "value": 1 }
      }),
      ctx(),
    )
    .unwrap();
    assert_eq!(
      out,
      json!([{ "name": "PUMP1", "value": 3 }, { "name": "PUMP2", "value": 5 }])
    );
  }

  #[test]
  fn test_unmatched_left_records_are_kept() {
    let out = run(
      json!({
        "function": "joinAttributes",
        "left": "$readings",
        "right": "$entities",
        "localField": "entityId",
        "foreignField": "_id"
      }),
      ctx(),
    )
    .unwrap();
    assert_eq!(
      out,
      json!([
        { "_id": "r1", "entityId": "e1", "value": 3, "name": "PUMP1", "site": "north" },
        { "_id": "r2", "entityId": "e2", "value": 5, "name": "PUMP2", "site": "south" },
        { "_id": "r3", "entityId": "e9", "value": 7 }
      ])
    );
  }

  #[test]
  fn test_scalar_filter_is_equality() {
    let out = run(
      json!({
        "function": "joinAttributes",
        "left": "$readings",
        "right": "$entities",
        "localField": "entityId",
        "foreignField": "_id",
        "filter": { "site": "south" }
      }),
      ctx(),
    )
    .unwrap();
    assert_eq!(out.as_array().unwrap().len(), 1);
    assert_eq!(out[0]["_id"], json!("r2"));
  }

  #[test]
  fn test_non_array_side_fails() {
    let err = run(
      json!({
        "function": "joinAttributes",
        "left": "$readings",
        "right": "$missing",
        "localField": "entityId",
        "foreignField": "_id"
      }),
      ctx(),
    )
    .unwrap_err();
    assert!(matches!(err, StepError::Validation { ref field, .. } if field == "right"));
  }
}
