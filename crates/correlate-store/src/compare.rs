//! Value equality and ordering across JSON types.
//!
//! Ordering follows the document-database convention of comparing by type
//! bracket first: null < numbers < strings < objects < arrays < booleans.

use std::cmp::Ordering;

use serde_json::Value;

fn type_rank(value: &Value) -> u8 {
  match value {
    Value::Null => 0,
    Value::Number(_) => 1,
    Value::String(_) => 2,
    Value::Object(_) => 3,
    Value::Array(_) => 4,
    Value::Bool(_) => 5,
  }
}

/// Structural equality where numbers compare by value (`1 == 1.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
  match (a, b) {
    (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
      (Some(x), Some(y)) => x == y,
      _ => x.as_f64() == y.as_f64(),
    },
    (Value::Array(x), Value::Array(y)) => {
      x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
    }
    (Value::Object(x), Value::Object(y)) => {
      x.len() == y.len()
        && x
          .iter()
          .all(|(k, v)| y.get(k).is_some_and(|other| values_equal(v, other)))
    }
    _ => a == b,
  }
}

/// Total ordering used by sorts and range operators.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
  let rank = type_rank(a).cmp(&type_rank(b));
  if rank != Ordering::Equal {
    return rank;
  }

  match (a, b) {
    (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
      (Some(x), Some(y)) => x.cmp(&y),
      _ => {
        let x = x.as_f64().unwrap_or(f64::NAN);
        let y = y.as_f64().unwrap_or(f64::NAN);
        x.partial_cmp(&y).unwrap_or(Ordering::Equal)
      }
    },
    (Value::String(x), Value::String(y)) => x.cmp(y),
    (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
    (Value::Array(x), Value::Array(y)) => {
      for (a, b) in x.iter().zip(y) {
        let ord = compare_values(a, b);
        if ord != Ordering::Equal {
          return ord;
        }
      }
      x.len().cmp(&y.len())
    }
    (Value::Object(x), Value::Object(y)) => {
      for ((ka, va), (kb, vb)) in x.iter().zip(y) {
        let ord = ka.cmp(kb).then_with(|| compare_values(va, vb));
        if ord != Ordering::Equal {
          return ord;
        }
      }
      x.len().cmp(&y.len())
    }
    _ => Ordering::Equal,
  }
}

/// Whether two values sit in the same type bracket for range comparisons.
pub(crate) fn same_bracket(a: &Value, b: &Value) -> bool {
  type_rank(a) == type_rank(b)
}
