//! Static checks for pipeline definitions.

use std::collections::{BTreeSet, HashMap};

use correlate_config::{StepDef, StepFunction};
use correlate_resolver::step_dependencies;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Errors make a template unusable; warnings flag likely mistakes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
  pub is_valid: bool,
  pub errors: Vec<String>,
  pub warnings: Vec<String>,
}

impl ValidationReport {
  pub fn new() -> Self {
    Self {
      is_valid: true,
      ..Default::default()
    }
  }

  pub fn error(&mut self, message: impl Into<String>) {
    self.errors.push(message.into());
    self.is_valid = false;
  }

  pub fn warning(&mut self, message: impl Into<String>) {
    self.warnings.push(message.into());
  }

  /// Fold another report in, prefixing its messages.
  pub fn merge(&mut self, prefix: &str, other: ValidationReport) {
    for e in other.errors {
      self.error(format!("{}{}", prefix, e));
    }
    for w in other.warnings {
      self.warning(format!("{}{}", prefix, w));
    }
  }
}

fn has_value(value: &Option<Value>) -> bool {
  value.as_ref().is_some_and(|v| !v.is_null())
}

fn has_text(value: &Option<String>) -> bool {
  value.as_deref().is_some_and(|s| !s.is_empty())
}

fn missing_fields(step: &StepDef, function: StepFunction) -> Vec<&'static str> {
  let mut missing = Vec::new();
  let has_collection = step.source_collection().is_some();
  match function {
    StepFunction::FindOne | StepFunction::Find | StepFunction::Count => {
      if !has_collection {
        missing.push("collection");
      }
    }
    StepFunction::Aggregate => {
      if !has_collection {
        missing.push("collection");
      }
      if !step.pipeline.as_ref().is_some_and(Value::is_array) {
        missing.push("pipeline");
      }
    }
    StepFunction::Lookup => {
      if !has_collection {
        missing.push("from");
      }
      if !has_value(&step.local_field) {
        missing.push("localField");
      }
      if !has_text(&step.foreign_field) {
        missing.push("foreignField");
      }
    }
    StepFunction::Sum => {
      if !has_collection {
        missing.push("collection");
      }
      if !has_text(&step.field) {
        missing.push("field");
      }
    }
    StepFunction::JoinAttributes => {
      if !has_value(&step.left) {
        missing.push("left");
      }
      if !has_value(&step.right) {
        missing.push("right");
      }
      if !step.local_field.as_ref().is_some_and(Value::is_string) {
        missing.push("localField");
      }
      if !has_text(&step.foreign_field) {
        missing.push("foreignField");
      }
    }
  }
  missing
}

/// Check the steps of one pipeline.
///
/// Errors: unknown functions, missing required fields, missing output keys.
/// Warnings: duplicate output keys, references to outputs produced later.
pub fn validate_steps(steps: &[StepDef]) -> ValidationReport {
  let mut report = ValidationReport::new();

  if steps.is_empty() {
    report.warning("pipeline has no steps");
  }

  let mut first_producer: HashMap<&str, usize> = HashMap::new();
  for (index, step) in steps.iter().enumerate() {
    if let Some(key) = step.output_key() {
      first_producer.entry(key).or_insert(index);
    }
  }

  let mut seen: BTreeSet<&str> = BTreeSet::new();
  for (index, step) in steps.iter().enumerate() {
    let position = index + 1;

    match step.kind() {
      Ok(function) => {
        for field in missing_fields(step, function) {
          report.error(format!(
            "step {} ({}): missing required field '{}'",
            position, step.function, field
          ));
        }
      }
      Err(e) => report.error(format!("step {}: {}", position, e)),
    }

    match step.output_key() {
      Some(key) => {
        if !seen.insert(key) {
          report.warning(format!(
            "step {} ({}): output key '{}' is already used; the later value wins",
            position, step.function, key
          ));
        }
      }
      None => report.error(format!(
        "step {} ({}): missing output key",
        position, step.function
      )),
    }

    for dependency in step_dependencies(step) {
      if let Some(&producer) = first_producer.get(dependency.as_str())
        && producer >= index
      {
        report.warning(format!(
          "step {} ({}): '${}' is produced by step {} and will be undefined here",
          position,
          step.function,
          dependency,
          producer + 1
        ));
      }
    }
  }

  report
}

/// Check an input schema's shape.
///
/// Accepted: absent/`null`, an object (optionally with a `properties`
/// object), or an array of names / `{ "name": ... }` objects.
pub fn validate_input_schema(input_schema: Option<&Value>) -> ValidationReport {
  let mut report = ValidationReport::new();
  match input_schema {
    None | Some(Value::Null) => {}
    Some(Value::Object(map)) => {
      if let Some(props) = map.get("properties")
        && !props.is_object()
      {
        report.error("inputSchema.properties must be an object");
      }
    }
    Some(Value::Array(items)) => {
      for (i, item) in items.iter().enumerate() {
        let ok = match item {
          Value::String(s) => !s.is_empty(),
          Value::Object(m) => m.get("name").and_then(Value::as_str).is_some_and(|s| !s.is_empty()),
          _ => false,
        };
        if !ok {
          report.error(format!(
            "inputSchema[{}] must be a name or an object with a name",
            i
          ));
        }
      }
    }
    Some(_) => report.error("inputSchema must be an object or an array"),
  }
  report
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn steps(value: Value) -> Vec<StepDef> {
    serde_json::from_value(value).unwrap()
  }

  #[test]
  fn test_valid_pipeline() {
    let report = validate_steps(&steps(json!([
      { "function": "findOne", "collection": "Entities", "output": "entity" },
      { "function": "lookup", "from": "Readings", "localField": "$entity._id",
        "foreignField": "entityId", "output": "readings" }
    ])));
    assert!(report.is_valid, "{:?}", report);
    assert!(report.warnings.is_empty());
  }

  #[test]
  fn test_errors() {
    let report = validate_steps(&steps(json!([
      { "function": "explode", "output": "x" },
      { "function": "sum", "collection": "Readings" },
      { "function": "joinAttributes", "left": "$x", "output": "j" }
    ])));
    assert!(!report.is_valid);
    assert_eq!(
      report.errors,
      vec![
        "step 1: unknown step function 'explode'",
        "step 2 (sum): missing required field 'field'",
        "step 2 (sum): missing output key",
        "step 3 (joinAttributes): missing required field 'right'",
        "step 3 (joinAttributes): missing required field 'localField'",
        "step 3 (joinAttributes): missing required field 'foreignField'",
      ]
    );
  }

  #[test]
  fn test_duplicate_and_forward_reference_warnings() {
    let report = validate_steps(&steps(json!([
      { "function": "find", "collection": "A", "filter": { "k": "$later.v" }, "output": "a" },
      { "function": "count", "collection": "B", "output": "a" },
      { "function": "count", "collection": "C", "output": "later" }
    ])));
    assert!(report.is_valid);
    assert_eq!(report.warnings.len(), 2);
    assert!(report.warnings[0].contains("'$later' is produced by step 3"));
    assert!(report.warnings[1].contains("output key 'a' is already used"));
  }

  #[test]
  fn test_input_schema_shapes() {
    assert!(validate_input_schema(None).is_valid);
    assert!(validate_input_schema(Some(&json!({ "properties": { "a": {} } }))).is_valid);
    assert!(validate_input_schema(Some(&json!(["a", { "name": "b" }]))).is_valid);
    assert!(!validate_input_schema(Some(&json!({ "properties": [] }))).is_valid);
    assert!(!validate_input_schema(Some(&json!([{ "type": "string" }]))).is_valid);
    assert!(!validate_input_schema(Some(&json!("a"))).is_valid);
  }
}
