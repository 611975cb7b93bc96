use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where a context value came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
  pub collection: Option<String>,
  pub ids: Vec<Value>,
}

impl Provenance {
  /// Record the `_id` of every document in `value` (a document or an array
  /// of documents).
  pub fn of(collection: Option<&str>, value: &Value) -> Self {
    let ids = match value {
      Value::Array(items) => items.iter().filter_map(|d| d.get("_id")).cloned().collect(),
      Value::Object(map) => map.get("_id").cloned().into_iter().collect(),
      _ => Vec::new(),
    };
    Self {
      collection: collection.map(str::to_string),
      ids,
    }
  }
}

/// Mutable state threaded through the steps of one run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
  pub ctx: Map<String, Value>,
  pub ctx_id: Map<String, Value>,
}

impl ExecutionContext {
  /// Record a step result. A later write to the same key wins.
  pub fn record(&mut self, key: &str, value: Value, provenance: Provenance) {
    self.ctx.insert(key.to_string(), value);
    self.ctx_id.insert(
      key.to_string(),
      serde_json::to_value(provenance).unwrap_or(Value::Null),
    );
  }

  pub fn into_output(self) -> PipelineOutput {
    PipelineOutput {
      ctx: self.ctx,
      ctx_id: self.ctx_id,
      ..Default::default()
    }
  }
}

/// The result of running one pipeline.
///
/// `ctxDisplayCompMap` and `ctxDisplayComp` are reserved and always empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutput {
  pub ctx: Map<String, Value>,
  pub ctx_id: Map<String, Value>,
  #[serde(default)]
  pub ctx_display_comp_map: Map<String, Value>,
  #[serde(default)]
  pub ctx_display_comp: Map<String, Value>,
}

impl PipelineOutput {
  pub fn to_value(&self) -> Value {
    serde_json::to_value(self).unwrap_or(Value::Null)
  }
}
