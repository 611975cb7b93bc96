//! Aggregation pipeline evaluation.
//!
//! Stages: `$match $project $addFields $group $sort $limit $skip $count
//! $unwind`. Group accumulators: `$sum $avg $min $max $first $last $push
//! $addToSet $count`. Expressions: field paths (`"$a.b"`), literals, and
//! `$add $subtract $multiply $divide $concat $ifNull $size $toString`.

use std::cmp::Ordering;

use serde_json::{Map, Number, Value};

use crate::StoreError;
use crate::compare::{compare_values, values_equal};
use crate::filter::matches;
use crate::path::{get_path, set_path};
use crate::projection::sort_documents;

/// Run `stages` over `docs`.
pub fn run_pipeline(docs: Vec<Value>, stages: &[Value]) -> Result<Vec<Value>, StoreError> {
  let mut docs = docs;
  for (index, stage) in stages.iter().enumerate() {
    let (name, spec) = stage
      .as_object()
      .filter(|m| m.len() == 1)
      .and_then(|m| m.iter().next())
      .ok_or_else(|| {
        StoreError::InvalidQuery(format!(
          "stage {} must be an object with exactly one operator",
          index
        ))
      })?;

    docs = match name.as_str() {
      "$match" => {
        let mut kept = Vec::with_capacity(docs.len());
        for doc in docs {
          if matches(&doc, spec)? {
            kept.push(doc);
          }
        }
        kept
      }
      "$project" => docs
        .iter()
        .map(|d| project_stage(d, spec))
        .collect::<Result<_, _>>()?,
      "$addFields" | "$set" => {
        let fields = expect_object(name, spec)?;
        docs
          .into_iter()
          .map(|mut d| {
            for (path, expr) in fields {
              let value = eval(&d, expr).unwrap_or(Value::Null);
              set_path(&mut d, path, value);
            }
            d
          })
          .collect()
      }
      "$group" => group_stage(&docs, spec)?,
      "$sort" => {
        sort_documents(&mut docs, spec);
        docs
      }
      "$limit" => {
        let n = expect_count(name, spec)?;
        docs.into_iter().take(n).collect()
      }
      "$skip" => {
        let n = expect_count(name, spec)?;
        docs.into_iter().skip(n).collect()
      }
      "$count" => {
        let field = spec
          .as_str()
          .filter(|s| !s.is_empty())
          .ok_or_else(|| StoreError::InvalidQuery("$count requires a field name".into()))?;
        if docs.is_empty() {
          Vec::new()
        } else {
          let mut out = Map::new();
          out.insert(field.to_string(), Value::from(docs.len() as u64));
          vec![Value::Object(out)]
        }
      }
      "$unwind" => unwind_stage(docs, spec)?,
      other => {
        return Err(StoreError::InvalidQuery(format!(
          "unsupported aggregation stage '{}'",
          other
        )));
      }
    };
  }
  Ok(docs)
}

fn expect_object<'a>(stage: &str, spec: &'a Value) -> Result<&'a Map<String, Value>, StoreError> {
  spec
    .as_object()
    .ok_or_else(|| StoreError::InvalidQuery(format!("{} requires an object", stage)))
}

fn expect_count(stage: &str, spec: &Value) -> Result<usize, StoreError> {
  spec
    .as_u64()
    .map(|n| n as usize)
    .ok_or_else(|| StoreError::InvalidQuery(format!("{} requires a non-negative integer", stage)))
}

/// Evaluate an aggregation expression. `None` means the value is missing.
fn eval(doc: &Value, expr: &Value) -> Option<Value> {
  match expr {
    Value::String(s) if s.starts_with('$') && !s.starts_with("$$") => {
      get_path(doc, &s[1..]).cloned()
    }
    Value::Array(items) => Some(Value::Array(
      items
        .iter()
        .map(|e| eval(doc, e).unwrap_or(Value::Null))
        .collect(),
    )),
    Value::Object(map) if map.len() == 1 => {
      let (op, arg) = map.iter().next()?;
      if op.starts_with('$') {
        eval_operator(doc, op, arg)
      } else {
        Some(Value::Object(eval_object(doc, map)))
      }
    }
    Value::Object(map) => Some(Value::Object(eval_object(doc, map))),
    other => Some(other.clone()),
  }
}

fn eval_object(doc: &Value, map: &Map<String, Value>) -> Map<String, Value> {
  map
    .iter()
    .filter_map(|(k, v)| eval(doc, v).map(|v| (k.clone(), v)))
    .collect()
}

fn eval_args(doc: &Value, arg: &Value) -> Vec<Option<Value>> {
  match arg {
    Value::Array(items) => items.iter().map(|e| eval(doc, e)).collect(),
    single => vec![eval(doc, single)],
  }
}

fn eval_operator(doc: &Value, op: &str, arg: &Value) -> Option<Value> {
  let args = eval_args(doc, arg);
  match op {
    "$add" | "$multiply" => {
      let mut acc = NumAcc::default();
      if op == "$multiply" {
        acc = NumAcc::one();
      }
      for value in args {
        let n = value?;
        if op == "$add" {
          acc.add(&n);
        } else {
          acc.mul(&n);
        }
      }
      Some(acc.into_value())
    }
    "$subtract" | "$divide" => {
      let (a, b) = match args.as_slice() {
        [Some(a), Some(b)] => (a.as_f64()?, b.as_f64()?),
        _ => return Some(Value::Null),
      };
      let result = if op == "$subtract" {
        a - b
      } else if b == 0.0 {
        return Some(Value::Null);
      } else {
        a / b
      };
      Some(number(result))
    }
    "$concat" => {
      let mut out = String::new();
      for value in args {
        match value? {
          Value::String(s) => out.push_str(&s),
          Value::Null => return Some(Value::Null),
          other => out.push_str(&other.to_string()),
        }
      }
      Some(Value::String(out))
    }
    "$ifNull" => args
      .into_iter()
      .flatten()
      .find(|v| !v.is_null())
      .or(Some(Value::Null)),
    "$size" => match args.into_iter().next().flatten() {
      Some(Value::Array(items)) => Some(Value::from(items.len() as u64)),
      _ => None,
    },
    "$toString" => match args.into_iter().next().flatten() {
      Some(Value::String(s)) => Some(Value::String(s)),
      Some(Value::Null) | None => Some(Value::Null),
      Some(other) => Some(Value::String(other.to_string())),
    },
    _ => Some(Value::Null),
  }
}

fn number(n: f64) -> Value {
  if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
    Value::from(n as i64)
  } else {
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
  }
}

/// Numeric accumulator that stays integral while every input is integral.
#[derive(Debug, Clone, Copy)]
struct NumAcc {
  int: i64,
  float: f64,
  integral: bool,
}

impl Default for NumAcc {
  fn default() -> Self {
    Self {
      int: 0,
      float: 0.0,
      integral: true,
    }
  }
}

impl NumAcc {
  fn one() -> Self {
    Self {
      int: 1,
      float: 1.0,
      integral: true,
    }
  }

  fn add(&mut self, value: &Value) {
    let Value::Number(n) = value else {
      return;
    };
    match n.as_i64() {
      Some(i) if self.integral => match self.int.checked_add(i) {
        Some(sum) => {
          self.int = sum;
          self.float += i as f64;
        }
        None => {
          self.integral = false;
          self.float += i as f64;
        }
      },
      _ => {
        self.integral = false;
        self.float += n.as_f64().unwrap_or(0.0);
      }
    }
  }

  fn mul(&mut self, value: &Value) {
    let Value::Number(n) = value else {
      return;
    };
    match n.as_i64() {
      Some(i) if self.integral => match self.int.checked_mul(i) {
        Some(p) => {
          self.int = p;
          self.float *= i as f64;
        }
        None => {
          self.integral = false;
          self.float *= i as f64;
        }
      },
      _ => {
        self.integral = false;
        self.float *= n.as_f64().unwrap_or(0.0);
      }
    }
  }

  fn into_value(self) -> Value {
    if self.integral {
      Value::from(self.int)
    } else {
      Number::from_f64(self.float)
        .map(Value::Number)
        .unwrap_or(Value::Null)
    }
  }
}

fn project_stage(doc: &Value, spec: &Value) -> Result<Value, StoreError> {
  let spec = expect_object("$project", spec)?;

  let is_flag = |v: &Value| matches!(v, Value::Bool(_) | Value::Number(_));
  let is_include = |v: &Value| match v {
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
    _ => true,
  };

  let inclusion = spec
    .iter()
    .any(|(k, v)| k != "_id" && (!is_flag(v) || is_include(v)));

  if !inclusion {
    return Ok(crate::projection::project(doc, &Value::Object(spec.clone())));
  }

  let mut out = Value::Object(Map::new());
  let keep_id = spec.get("_id").is_none_or(|v| !is_flag(v) || is_include(v));
  for (path, rule) in spec {
    if path == "_id" && !keep_id {
      continue;
    }
    if is_flag(rule) {
      if is_include(rule)
        && let Some(value) = get_path(doc, path)
      {
        set_path(&mut out, path, value.clone());
      }
    } else if let Some(value) = eval(doc, rule) {
      set_path(&mut out, path, value);
    }
  }
  if keep_id
    && !spec.contains_key("_id")
    && let Some(id) = doc.get("_id")
  {
    let mut with_id = Map::new();
    with_id.insert("_id".to_string(), id.clone());
    if let Value::Object(rest) = out {
      with_id.extend(rest);
    }
    out = Value::Object(with_id);
  }
  Ok(out)
}

#[derive(Debug)]
enum Accumulator {
  Sum(NumAcc),
  Avg { total: f64, count: u64 },
  Min(Option<Value>),
  Max(Option<Value>),
  First(Option<Value>),
  Last(Option<Value>),
  Push(Vec<Value>),
  AddToSet(Vec<Value>),
}

impl Accumulator {
  fn new(op: &str) -> Result<Self, StoreError> {
    Ok(match op {
      "$sum" | "$count" => Accumulator::Sum(NumAcc::default()),
      "$avg" => Accumulator::Avg { total: 0.0, count: 0 },
      "$min" => Accumulator::Min(None),
      "$max" => Accumulator::Max(None),
      "$first" => Accumulator::First(None),
      "$last" => Accumulator::Last(None),
      "$push" => Accumulator::Push(Vec::new()),
      "$addToSet" => Accumulator::AddToSet(Vec::new()),
      other => {
        return Err(StoreError::InvalidQuery(format!(
          "unsupported accumulator '{}'",
          other
        )));
      }
    })
  }

  fn feed(&mut self, value: Option<Value>) {
    match self {
      Accumulator::Sum(acc) => {
        if let Some(v) = value {
          acc.add(&v);
        }
      }
      Accumulator::Avg { total, count } => {
        if let Some(n) = value.as_ref().and_then(Value::as_f64) {
          *total += n;
          *count += 1;
        }
      }
      Accumulator::Min(current) => keep_extreme(current, value, Ordering::Less),
      Accumulator::Max(current) => keep_extreme(current, value, Ordering::Greater),
      Accumulator::First(current) => {
        if current.is_none() {
          *current = Some(value.unwrap_or(Value::Null));
        }
      }
      Accumulator::Last(current) => *current = Some(value.unwrap_or(Value::Null)),
      Accumulator::Push(items) => {
        if let Some(v) = value {
          items.push(v);
        }
      }
      Accumulator::AddToSet(items) => {
        if let Some(v) = value
          && !items.iter().any(|i| values_equal(i, &v))
        {
          items.push(v);
        }
      }
    }
  }

  fn finish(self) -> Value {
    match self {
      Accumulator::Sum(acc) => acc.into_value(),
      Accumulator::Avg { total, count } => {
        if count == 0 {
          Value::Null
        } else {
          Number::from_f64(total / count as f64)
            .map(Value::Number)
            .unwrap_or(Value::Null)
        }
      }
      Accumulator::Min(v) | Accumulator::Max(v) | Accumulator::First(v) | Accumulator::Last(v) => {
        v.unwrap_or(Value::Null)
      }
      Accumulator::Push(items) | Accumulator::AddToSet(items) => Value::Array(items),
    }
  }
}

fn keep_extreme(current: &mut Option<Value>, value: Option<Value>, want: Ordering) {
  let Some(v) = value.filter(|v| !v.is_null()) else {
    return;
  };
  let replace = current
    .as_ref()
    .is_none_or(|c| compare_values(&v, c) == want);
  if replace {
    *current = Some(v);
  }
}

fn group_stage(docs: &[Value], spec: &Value) -> Result<Vec<Value>, StoreError> {
  let spec = expect_object("$group", spec)?;
  let id_expr = spec
    .get("_id")
    .ok_or_else(|| StoreError::InvalidQuery("$group requires an _id".into()))?;

  let mut fields: Vec<(&String, &str, &Value)> = Vec::new();
  for (name, acc) in spec.iter().filter(|(k, _)| *k != "_id") {
    let (op, arg) = acc
      .as_object()
      .filter(|m| m.len() == 1)
      .and_then(|m| m.iter().next())
      .ok_or_else(|| {
        StoreError::InvalidQuery(format!("accumulator for '{}' must have one operator", name))
      })?;
    Accumulator::new(op)?;
    fields.push((name, op.as_str(), arg));
  }

  let mut groups: Vec<(Value, Vec<Accumulator>)> = Vec::new();
  for doc in docs {
    let key = eval(doc, id_expr).unwrap_or(Value::Null);
    let position = match groups.iter().position(|(k, _)| values_equal(k, &key)) {
      Some(p) => p,
      None => {
        let accs = fields
          .iter()
          .map(|(_, op, _)| Accumulator::new(op))
          .collect::<Result<Vec<_>, _>>()?;
        groups.push((key, accs));
        groups.len() - 1
      }
    };

    let accs = &mut groups[position].1;
    for (acc, (_, op, arg)) in accs.iter_mut().zip(&fields) {
      let value = if *op == "$count" {
        Some(Value::from(1))
      } else {
        eval(doc, arg)
      };
      acc.feed(value);
    }
  }

  Ok(
    groups
      .into_iter()
      .map(|(key, accs)| {
        let mut out = Map::new();
        out.insert("_id".to_string(), key);
        for (acc, (name, _, _)) in accs.into_iter().zip(&fields) {
          out.insert((*name).clone(), acc.finish());
        }
        Value::Object(out)
      })
      .collect(),
  )
}

fn unwind_stage(docs: Vec<Value>, spec: &Value) -> Result<Vec<Value>, StoreError> {
  let (path, preserve) = match spec {
    Value::String(p) => (p.as_str(), false),
    Value::Object(m) => (
      m.get("path").and_then(Value::as_str).unwrap_or(""),
      m.get("preserveNullAndEmptyArrays")
        .and_then(Value::as_bool)
        .unwrap_or(false),
    ),
    _ => ("", false),
  };
  let path = path
    .strip_prefix('$')
    .ok_or_else(|| StoreError::InvalidQuery("$unwind requires a '$field' path".into()))?;

  let mut out = Vec::new();
  for doc in docs {
    match get_path(&doc, path).cloned() {
      Some(Value::Array(items)) if !items.is_empty() => {
        for item in items {
          let mut copy = doc.clone();
          set_path(&mut copy, path, item);
          out.push(copy);
        }
      }
      Some(Value::Array(_)) | Some(Value::Null) | None => {
        if preserve {
          out.push(doc);
        }
      }
      Some(_) => out.push(doc),
    }
  }
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn readings() -> Vec<Value> {
    vec![
      json!({ "_id": 1, "entityId": "e1", "value": 10, "tags": ["a", "b"] }),
      json!({ "_id": 2, "entityId": "e1", "value": 5.5, "tags": [] }),
      json!({ "_id": 3, "entityId": "e2", "value": 7, "tags": ["c"] }),
    ]
  }

  #[test]
  fn test_match_group_sum() {
    let out = run_pipeline(
      readings(),
      &[
        json!({ "$match": { "entityId": "e1" } }),
        json!({ "$group": { "_id": null, "total": { "$sum": "$value" } } }),
      ],
    )
    .unwrap();
    assert_eq!(out, vec![json!({ "_id": null, "total": 15.5 })]);
  }

  #[test]
  fn test_group_by_field_keeps_first_seen_order() {
    let out = run_pipeline(
      readings(),
      &[json!({ "$group": {
        "_id": "$entityId",
        "n": { "$sum": 1 },
        "max": { "$max": "$value" },
        "ids": { "$push": "$_id" }
      } })],
    )
    .unwrap();
    assert_eq!(
      out,
      vec![
        json!({ "_id": "e1", "n": 2, "max": 10, "ids": [1, 2] }),
        json!({ "_id": "e2", "n": 1, "max": 7, "ids": [3] }),
      ]
    );
  }

  #[test]
  fn test_project_with_computed_field() {
    let out = run_pipeline(
      readings(),
      &[
        json!({ "$match": { "_id": 3 } }),
        json!({ "$project": { "entityId": 1, "double": { "$multiply": ["$value", 2] } } }),
      ],
    )
    .unwrap();
    assert_eq!(out, vec![json!({ "_id": 3, "entityId": "e2", "double": 14 })]);
  }

  #[test]
  fn test_unwind_sort_limit_count() {
    let out = run_pipeline(
      readings(),
      &[
        json!({ "$unwind": "$tags" }),
        json!({ "$sort": { "tags": -1 } }),
        json!({ "$limit": 2 }),
      ],
    )
    .unwrap();
    let tags: Vec<_> = out.iter().map(|d| d["tags"].clone()).collect();
    assert_eq!(tags, vec![json!("c"), json!("b")]);

    let out = run_pipeline(readings(), &[json!({ "$count": "n" })]).unwrap();
    assert_eq!(out, vec![json!({ "n": 3 })]);
  }

  #[test]
  fn test_unknown_stage_fails() {
    let err = run_pipeline(readings(), &[json!({ "$facet": {} })]).unwrap_err();
    assert!(matches!(err, StoreError::InvalidQuery(_)));
  }
}
