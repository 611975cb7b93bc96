//! Result shapes returned by template execution.

use correlate_config::normalize_statement;
use correlate_pipeline::PipelineOutput;
use serde_json::{Map, Value, json};

/// Key the logic result is stored under.
pub const LOGIC_RESULT_KEY: &str = "jsLogicResult";

/// Envelope version produced by [`TemplateOutput::to_envelope`].
pub const ENVELOPE_VERSION: u64 = 2;

/// One pipeline's output plus how it can be addressed.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedPipelineOutput {
  /// 1-based position in the template.
  pub index: usize,
  pub statement: Option<String>,
  pub output: PipelineOutput,
}

impl NamedPipelineOutput {
  pub fn alias(&self) -> String {
    format!("pipeline_{}", self.index)
  }
}

/// The typed result of executing a template.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateOutput {
  Single {
    pipeline: NamedPipelineOutput,
    logic_result: Option<Value>,
  },
  Multi {
    pipelines: Vec<NamedPipelineOutput>,
    logic_result: Option<Value>,
  },
}

/// Every pipeline under `pipeline_{n}`, its statement and the normalized
/// statement. Later pipelines win on colliding aliases.
pub(crate) fn alias_map(pipelines: &[NamedPipelineOutput]) -> Map<String, Value> {
  let mut map = Map::new();
  for pipeline in pipelines {
    let value = pipeline.output.to_value();
    map.insert(pipeline.alias(), value.clone());
    if let Some(statement) = &pipeline.statement {
      map.insert(statement.clone(), value.clone());
      map.insert(normalize_statement(statement), value);
    }
  }
  map
}

impl TemplateOutput {
  pub fn logic_result(&self) -> Option<&Value> {
    match self {
      TemplateOutput::Single { logic_result, .. } | TemplateOutput::Multi { logic_result, .. } => {
        logic_result.as_ref()
      }
    }
  }

  pub fn pipelines(&self) -> &[NamedPipelineOutput] {
    match self {
      TemplateOutput::Single { pipeline, .. } => std::slice::from_ref(pipeline),
      TemplateOutput::Multi { pipelines, .. } => pipelines,
    }
  }

  /// The historical shapes: a single pipeline's `{ctx, ctxId, ...}` object,
  /// or a map of pipeline aliases. `jsLogicResult` is added when logic ran.
  pub fn to_legacy_json(&self) -> Value {
    let mut map = match self {
      TemplateOutput::Single { pipeline, .. } => match pipeline.output.to_value() {
        Value::Object(map) => map,
        _ => Map::new(),
      },
      TemplateOutput::Multi { pipelines, .. } => alias_map(pipelines),
    };
    if let Some(result) = self.logic_result() {
      map.insert(LOGIC_RESULT_KEY.to_string(), result.clone());
    }
    Value::Object(map)
  }

  /// One shape for both kinds of template.
  pub fn to_envelope(&self) -> Value {
    let kind = match self {
      TemplateOutput::Single { .. } => "single",
      TemplateOutput::Multi { .. } => "multi",
    };
    let pipelines: Vec<Value> = self
      .pipelines()
      .iter()
      .map(|p| {
        json!({
          "index": p.index,
          "statement": p.statement,
          "ctx": p.output.ctx,
          "ctxId": p.output.ctx_id,
        })
      })
      .collect();
    json!({
      "version": ENVELOPE_VERSION,
      "kind": kind,
      "pipelines": pipelines,
      LOGIC_RESULT_KEY: self.logic_result().cloned().unwrap_or(Value::Null),
    })
  }

  /// Legacy JSON with the logic result projected onto the `properties` of
  /// `output_schema`. Left untouched when either side is not an object.
  pub fn shaped(&self, output_schema: Option<&Value>) -> Value {
    let mut value = self.to_legacy_json();
    let Some(properties) = output_schema
      .and_then(|s| s.get("properties"))
      .and_then(Value::as_object)
    else {
      return value;
    };
    if let Some(Value::Object(result)) = value.get_mut(LOGIC_RESULT_KEY) {
      let projected: Map<String, Value> = properties
        .keys()
        .filter_map(|k| result.get(k).map(|v| (k.clone(), v.clone())))
        .collect();
      *result = projected;
    }
    value
  }
}
