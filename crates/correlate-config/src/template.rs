use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::declared_input_names;
use crate::step::StepDef;

/// A stored template: one or more pipelines plus optional post-processing logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDef {
  /// Document id; assigned by the store when absent.
  #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,

  pub name: String,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub input_schema: Option<Value>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output_schema: Option<Value>,

  #[serde(alias = "internalSchemas")]
  pub internal_schema: InternalSchema,

  /// Post-processing logic source (Lua).
  #[serde(
    default,
    alias = "jsLogic",
    alias = "logicSource",
    skip_serializing_if = "Option::is_none"
  )]
  pub logic: Option<String>,
}

/// A template holds either one pipeline or an ordered list of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InternalSchema {
  Multi(Vec<PipelineDef>),
  Single(PipelineDef),
}

/// Steps plus the statement string the pipeline can be addressed by.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDef {
  #[serde(default)]
  pub pipeline_steps: Vec<StepDef>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub pipeline_statement: Option<String>,
}

impl InternalSchema {
  /// All pipelines in declaration order.
  pub fn pipelines(&self) -> Vec<&PipelineDef> {
    match self {
      InternalSchema::Multi(list) => list.iter().collect(),
      InternalSchema::Single(pipeline) => vec![pipeline],
    }
  }

  pub fn is_multi(&self) -> bool {
    matches!(self, InternalSchema::Multi(_))
  }
}

impl TemplateDef {
  /// Parameter names declared by the input schema, in declaration order.
  pub fn input_names(&self) -> Vec<String> {
    self
      .input_schema
      .as_ref()
      .map(declared_input_names)
      .unwrap_or_default()
  }

  /// Logic source, if any non-blank source is present.
  pub fn logic_source(&self) -> Option<&str> {
    self.logic.as_deref().filter(|s| !s.trim().is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_single_internal_schema() {
    let template: TemplateDef = serde_json::from_value(json!({
      "_id": "tpl-1",
      "name": "pump readings",
      "internalSchema": {
        "pipelineStatement": "Pump Readings",
        "pipelineSteps": [
          { "function": "findOne", "collection": "Entities", "output": "entity" }
        ]
      }
    }))
    .unwrap();

    assert_eq!(template.id.as_deref(), Some("tpl-1"));
    assert!(!template.internal_schema.is_multi());
    let pipelines = template.internal_schema.pipelines();
    assert_eq!(pipelines.len(), 1);
    assert_eq!(pipelines[0].pipeline_steps.len(), 1);
    assert_eq!(
      pipelines[0].pipeline_statement.as_deref(),
      Some("Pump Readings")
    );
  }

  #[test]
  fn test_multi_internal_schema_keeps_order() {
    let template: TemplateDef = serde_json::from_value(json!({
      "name": "multi",
      "internalSchemas": [
        { "pipelineStatement": "p1", "pipelineSteps": [] },
        { "pipelineStatement": "p2 result", "pipelineSteps": [] }
      ],
      "jsLogic": "return 1"
    }))
    .unwrap();

    assert!(template.internal_schema.is_multi());
    let statements: Vec<_> = template
      .internal_schema
      .pipelines()
      .iter()
      .map(|p| p.pipeline_statement.clone().unwrap())
      .collect();
    assert_eq!(statements, vec!["p1", "p2 result"]);
    assert_eq!(template.logic_source(), Some("return 1"));
  }

  #[test]
  fn test_blank_logic_is_ignored() {
    let template: TemplateDef = serde_json::from_value(json!({
      "name": "t",
      "internalSchema": { "pipelineSteps": [] },
      "logic": "   \n"
    }))
    .unwrap();
    assert_eq!(template.logic_source(), None);
  }
}
