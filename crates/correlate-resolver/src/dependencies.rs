use std::collections::BTreeSet;

use correlate_config::StepDef;
use serde_json::Value;

/// Context keys a step refers to.
///
/// Scans the expression-bearing fields of the step for `$KEY...` tokens and
/// keeps the first path segment. Parameter references and `$$` store
/// variables are ignored.
pub fn step_dependencies(step: &StepDef) -> BTreeSet<String> {
  let mut out = BTreeSet::new();
  for (_, value) in step.reference_fields() {
    if let Some(value) = value {
      collect_references(value, &mut out);
    }
  }
  out
}

/// Collect `$KEY` reference roots from every string inside `value`.
pub fn collect_references(value: &Value, out: &mut BTreeSet<String>) {
  match value {
    Value::String(s) => {
      if let Some(root) = reference_root(s) {
        out.insert(root.to_string());
      }
    }
    Value::Array(items) => items.iter().for_each(|v| collect_references(v, out)),
    Value::Object(map) => map.values().for_each(|v| collect_references(v, out)),
    _ => {}
  }
}

fn reference_root(s: &str) -> Option<&str> {
  let rest = s.strip_prefix('$')?;
  if rest.starts_with('$') {
    return None;
  }
  let root = rest.split('.').next()?;
  if root.is_empty() || root == "params" {
    return None;
  }
  Some(root)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_step_dependencies() {
    let step: StepDef = serde_json::from_value(json!({
      "function": "aggregate",
      "collection": "Readings",
      "filter": { "site": "$params.site" },
      "pipeline": [
        { "$match": { "entityId": { "$in": "$entities._id" } } },
        { "$group": { "_id": "$$ROOT", "total": { "$sum": "$value" } } }
      ],
      "output": "totals"
    }))
    .unwrap();

    let deps: Vec<_> = step_dependencies(&step).into_iter().collect();
    assert_eq!(deps, vec!["entities", "value"]);
  }

  #[test]
  fn test_join_sides_are_scanned() {
    let step: StepDef = serde_json::from_value(json!({
      "function": "joinAttributes",
      "left": "$readings",
      "right": "$entities",
      "localField": "entityId",
      "foreignField": "_id",
      "projection": { "$ignored": 1 }
    }))
    .unwrap();

    let deps: Vec<_> = step_dependencies(&step).into_iter().collect();
    assert_eq!(deps, vec!["entities", "readings"]);
  }

  #[test]
  fn test_no_references() {
    let step = StepDef {
      function: "count".into(),
      filter: Some(json!({ "status": "open", "n": 3 })),
      ..Default::default()
    };
    assert!(step_dependencies(&step).is_empty());
  }
}
