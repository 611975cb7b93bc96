//! Helpers for reading template input schemas and pipeline statements.

use serde_json::Value;

/// Extract declared input parameter names from an input schema.
///
/// Accepted shapes:
/// - a JSON Schema object with `properties` (declaration order is kept)
/// - an array of names: `["entityName", "from"]`
/// - an array of objects with a `name` field: `[{ "name": "entityName" }]`
pub fn declared_input_names(input_schema: &Value) -> Vec<String> {
  match input_schema {
    Value::Object(map) => map
      .get("properties")
      .and_then(Value::as_object)
      .map(|props| props.keys().cloned().collect())
      .unwrap_or_default(),
    Value::Array(items) => items
      .iter()
      .filter_map(|item| match item {
        Value::String(name) => Some(name.clone()),
        Value::Object(obj) => obj.get("name").and_then(Value::as_str).map(str::to_string),
        _ => None,
      })
      .collect(),
    _ => Vec::new(),
  }
}

/// Remove all whitespace and lower-case a pipeline statement.
pub fn normalize_statement(statement: &str) -> String {
  statement
    .chars()
    .filter(|c| !c.is_whitespace())
    .flat_map(char::to_lowercase)
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_names_from_properties_keep_order() {
    let schema = json!({
      "type": "object",
      "properties": {
        "zeta": { "type": "string" },
        "alpha": { "type": "number" }
      }
    });
    assert_eq!(declared_input_names(&schema), vec!["zeta", "alpha"]);
  }

  #[test]
  fn test_names_from_arrays() {
    assert_eq!(
      declared_input_names(&json!(["a", { "name": "b" }, 3])),
      vec!["a", "b"]
    );
    assert!(declared_input_names(&json!("nope")).is_empty());
  }

  #[test]
  fn test_normalize_statement() {
    assert_eq!(normalize_statement("p2 result"), "p2result");
    assert_eq!(normalize_statement(" Daily\tPump  Report\n"), "dailypumpreport");
  }
}
