//! Query filter evaluation.
//!
//! Supported:
//! - field equality (`{ "name": "PUMP1" }`); an array field matches when any
//!   element is equal, and `null` matches a null or missing field
//! - comparison: `$eq $ne $gt $gte $lt $lte`
//! - membership: `$in $nin` (operand must be an array)
//! - `$exists $size $regex $not $elemMatch`
//! - logical: `$and $or $nor`

use std::cmp::Ordering;

use regex::Regex;
use serde_json::{Map, Value};

use crate::StoreError;
use crate::compare::{compare_values, same_bracket, values_equal};
use crate::path::lookup_path;

/// Check whether `doc` matches `filter`.
///
/// A `null` filter or an empty object matches every document.
pub fn matches(doc: &Value, filter: &Value) -> Result<bool, StoreError> {
  match filter {
    Value::Null => Ok(true),
    Value::Object(conditions) => matches_object(doc, conditions),
    other => Err(StoreError::InvalidQuery(format!(
      "filter must be an object, got {}",
      other
    ))),
  }
}

fn matches_object(doc: &Value, conditions: &Map<String, Value>) -> Result<bool, StoreError> {
  for (key, condition) in conditions {
    let ok = match key.as_str() {
      "$and" => {
        let mut all = true;
        for sub in logical_operands(key, condition)? {
          if !matches(doc, sub)? {
            all = false;
            break;
          }
        }
        all
      }
      "$or" => {
        let mut any = false;
        for sub in logical_operands(key, condition)? {
          if matches(doc, sub)? {
            any = true;
            break;
          }
        }
        any
      }
      "$nor" => {
        let mut none = true;
        for sub in logical_operands(key, condition)? {
          if matches(doc, sub)? {
            none = false;
            break;
          }
        }
        none
      }
      op if op.starts_with('$') => {
        return Err(StoreError::InvalidQuery(format!(
          "unsupported top-level operator '{}'",
          op
        )));
      }
      field => field_matches(&lookup_path(doc, field), condition)?,
    };

    if !ok {
      return Ok(false);
    }
  }
  Ok(true)
}

fn logical_operands<'a>(op: &str, condition: &'a Value) -> Result<&'a [Value], StoreError> {
  condition
    .as_array()
    .map(Vec::as_slice)
    .ok_or_else(|| StoreError::InvalidQuery(format!("{} requires an array", op)))
}

/// Whether an object is an operator expression (`{ "$gt": 5 }`).
fn is_operator_object(value: &Value) -> Option<&Map<String, Value>> {
  value
    .as_object()
    .filter(|m| !m.is_empty() && m.keys().all(|k| k.starts_with('$')))
}

fn field_matches(candidates: &[&Value], condition: &Value) -> Result<bool, StoreError> {
  match is_operator_object(condition) {
    Some(ops) => {
      for (op, operand) in ops {
        if op == "$options" {
          continue;
        }
        if !operator_matches(candidates, op, operand, ops)? {
          return Ok(false);
        }
      }
      Ok(true)
    }
    None => Ok(equality_matches(candidates, condition)),
  }
}

/// Equality with array-contains and null-means-missing semantics.
fn equality_matches(candidates: &[&Value], expected: &Value) -> bool {
  if expected.is_null() && candidates.is_empty() {
    return true;
  }
  candidates.iter().any(|candidate| {
    values_equal(candidate, expected)
      || candidate
        .as_array()
        .is_some_and(|items| items.iter().any(|item| values_equal(item, expected)))
  })
}

/// Every scalar reachable from the candidates, including array elements.
fn flatten<'a>(candidates: &[&'a Value]) -> Vec<&'a Value> {
  let mut out = Vec::new();
  for &candidate in candidates {
    match candidate {
      Value::Array(items) => out.extend(items.iter()),
      other => out.push(other),
    }
  }
  out
}

fn range_matches(candidates: &[&Value], operand: &Value, accept: fn(Ordering) -> bool) -> bool {
  flatten(candidates)
    .into_iter()
    .any(|v| same_bracket(v, operand) && accept(compare_values(v, operand)))
}

fn operator_matches(
  candidates: &[&Value],
  op: &str,
  operand: &Value,
  siblings: &Map<String, Value>,
) -> Result<bool, StoreError> {
  let result = match op {
    "$eq" => equality_matches(candidates, operand),
    "$ne" => !equality_matches(candidates, operand),
    "$gt" => range_matches(candidates, operand, Ordering::is_gt),
    "$gte" => range_matches(candidates, operand, Ordering::is_ge),
    "$lt" => range_matches(candidates, operand, Ordering::is_lt),
    "$lte" => range_matches(candidates, operand, Ordering::is_le),
    "$in" => {
      let options = in_operand(op, operand)?;
      options.iter().any(|o| equality_matches(candidates, o))
    }
    "$nin" => {
      let options = in_operand(op, operand)?;
      !options.iter().any(|o| equality_matches(candidates, o))
    }
    "$exists" => {
      let wanted = match operand {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::Null => false,
        _ => true,
      };
      wanted == !candidates.is_empty()
    }
    "$size" => {
      let size = operand
        .as_u64()
        .ok_or_else(|| StoreError::InvalidQuery("$size requires a non-negative integer".into()))?;
      candidates
        .iter()
        .any(|c| c.as_array().is_some_and(|a| a.len() as u64 == size))
    }
    "$regex" => {
      let pattern = operand
        .as_str()
        .ok_or_else(|| StoreError::InvalidQuery("$regex requires a string pattern".into()))?;
      let flags = siblings.get("$options").and_then(Value::as_str).unwrap_or("");
      let re = build_regex(pattern, flags)?;
      flatten(candidates)
        .into_iter()
        .any(|v| v.as_str().is_some_and(|s| re.is_match(s)))
    }
    "$not" => !field_matches(candidates, operand)?,
    "$elemMatch" => {
      let mut any = false;
      for item in candidates.iter().filter_map(|c| c.as_array()).flatten() {
        let hit = match is_operator_object(operand) {
          Some(_) => field_matches(&[item], operand)?,
          None => item.is_object() && matches(item, operand)?,
        };
        if hit {
          any = true;
          break;
        }
      }
      any
    }
    other => {
      return Err(StoreError::InvalidQuery(format!(
        "unsupported operator '{}'",
        other
      )));
    }
  };
  Ok(result)
}

fn in_operand<'a>(op: &str, operand: &'a Value) -> Result<&'a [Value], StoreError> {
  operand
    .as_array()
    .map(Vec::as_slice)
    .ok_or_else(|| StoreError::InvalidQuery(format!("{} needs an array", op)))
}

fn build_regex(pattern: &str, flags: &str) -> Result<Regex, StoreError> {
  let mut prefix = String::new();
  for flag in flags.chars() {
    match flag {
      'i' | 'm' | 's' | 'x' => prefix.push(flag),
      other => {
        return Err(StoreError::InvalidQuery(format!(
          "unsupported regex option '{}'",
          other
        )));
      }
    }
  }
  let full = if prefix.is_empty() {
    pattern.to_string()
  } else {
    format!("(?{}){}", prefix, pattern)
  };
  Regex::new(&full).map_err(|e| StoreError::InvalidQuery(format!("invalid regex: {}", e)))
}
