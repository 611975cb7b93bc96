//! Template loading, parameter mapping and execution.

use std::sync::Arc;

use async_trait::async_trait;
use correlate_config::TemplateDef;
use correlate_logic::{LogicError, LogicExecutor, TemplateCallback};
use correlate_pipeline::PipelineRunner;
use correlate_store::{DocumentStore, FindOptions};
use futures::future::try_join_all;
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::output::{NamedPipelineOutput, TemplateOutput, alias_map};
use crate::reference::TemplateRef;

/// Bind a lone unnamed parameter to the first declared input it could mean.
///
/// Applies only when `params` holds exactly one key that is not a declared
/// name. The original key is kept.
pub fn map_positional_params(declared: &[String], mut params: Map<String, Value>) -> Map<String, Value> {
  if declared.is_empty() || params.len() != 1 {
    return params;
  }
  let Some((key, value)) = params.iter().next().map(|(k, v)| (k.clone(), v.clone())) else {
    return params;
  };
  if declared.contains(&key) {
    return params;
  }

  let missing: Vec<&String> = declared.iter().filter(|n| !params.contains_key(*n)).collect();
  let Some(target) = missing.first() else {
    return params;
  };
  if missing.len() > 1 {
    warn!(
      param = %key,
      bound_to = %target,
      candidates = missing.len(),
      "positional parameter is ambiguous, binding to first declared input"
    );
  }
  params.insert((*target).clone(), value);
  params
}

/// Loads templates from the store and runs them.
#[derive(Clone)]
pub struct TemplateResolver {
  store: Arc<dyn DocumentStore>,
  runner: PipelineRunner,
  logic: LogicExecutor,
  config: Arc<EngineConfig>,
}

impl TemplateResolver {
  pub fn new(store: Arc<dyn DocumentStore>, config: Arc<EngineConfig>) -> Self {
    Self {
      runner: PipelineRunner::new(store.clone()),
      logic: LogicExecutor::new(config.logic.clone()),
      store,
      config,
    }
  }

  pub fn runner(&self) -> &PipelineRunner {
    &self.runner
  }

  /// Find the template `reference` points at.
  pub async fn load(&self, reference: &TemplateRef) -> Result<TemplateDef, EngineError> {
    let filter = match reference {
      TemplateRef::Id(id) => json!({ "_id": id }),
      TemplateRef::Name(name) => json!({
        "$or": [
          { "internalSchema.pipelineStatement": name },
          { "internalSchemas.pipelineStatement": name },
          { "name": name }
        ]
      }),
    };
    let document = self
      .store
      .find_one(&self.config.templates_collection, &filter, FindOptions::default())
      .await?
      .ok_or_else(|| EngineError::TemplateNotFound(reference.to_string()))?;

    serde_json::from_value(document).map_err(|e| EngineError::InvalidTemplate {
      identifier: reference.to_string(),
      message: e.to_string(),
    })
  }

  /// Caller params after the positional shim, when enabled.
  pub fn map_params(&self, template: &TemplateDef, params: Map<String, Value>) -> Map<String, Value> {
    if !self.config.positional_params {
      return params;
    }
    map_positional_params(&template.input_names(), params)
  }

  /// Load and run the template named by `identifier`.
  pub async fn resolve(
    &self,
    identifier: &str,
    params: Map<String, Value>,
  ) -> Result<TemplateOutput, EngineError> {
    self.resolve_at_depth(identifier, params, 0).await
  }

  async fn resolve_at_depth(
    &self,
    identifier: &str,
    params: Map<String, Value>,
    depth: usize,
  ) -> Result<TemplateOutput, EngineError> {
    let template = self.load(&TemplateRef::parse(identifier)).await?;
    let params = self.map_params(&template, params);
    self.execute(&template, &params, depth).await
  }

  /// Run every pipeline of `template`, then its logic. `params` are used as
  /// given.
  #[instrument(name = "template_execute", skip(self, template, params), fields(template = %template.name))]
  pub async fn execute(
    &self,
    template: &TemplateDef,
    params: &Map<String, Value>,
    depth: usize,
  ) -> Result<TemplateOutput, EngineError> {
    let definitions = template.internal_schema.pipelines();
    let runs = definitions.iter().enumerate().map(|(i, def)| async move {
      let output = self
        .runner
        .run(&def.pipeline_steps, params)
        .await
        .map_err(|source| EngineError::Pipeline {
          pipeline: i + 1,
          source,
        })?;
      Ok::<_, EngineError>(NamedPipelineOutput {
        index: i + 1,
        statement: def.pipeline_statement.clone(),
        output,
      })
    });
    let mut pipelines = try_join_all(runs).await?;
    debug!(pipelines = pipelines.len(), "pipelines_completed");

    let results = if template.internal_schema.is_multi() {
      alias_map(&pipelines)
    } else {
      pipelines
        .first()
        .map(|p| p.output.ctx.clone())
        .unwrap_or_default()
    };
    let logic_result = match template.logic_source() {
      Some(source) => Some(self.run_logic(source, &results, params, depth).await?),
      None => None,
    };

    if template.internal_schema.is_multi() {
      Ok(TemplateOutput::Multi {
        pipelines,
        logic_result,
      })
    } else {
      let pipeline = pipelines.pop().ok_or_else(|| EngineError::InvalidTemplate {
        identifier: template.name.clone(),
        message: "template has no pipeline".to_string(),
      })?;
      Ok(TemplateOutput::Single {
        pipeline,
        logic_result,
      })
    }
  }

  async fn run_logic(
    &self,
    source: &str,
    results: &Map<String, Value>,
    params: &Map<String, Value>,
    depth: usize,
  ) -> Result<Value, EngineError> {
    let callback: Arc<dyn TemplateCallback> = Arc::new(NestedTemplates {
      resolver: self.clone(),
    });
    let value = self
      .logic
      .execute(source, results, params, Some(callback), depth)
      .await?;
    info!(depth, "logic_completed");
    Ok(value)
  }
}

/// Lets logic scripts `resolve` other stored templates.
struct NestedTemplates {
  resolver: TemplateResolver,
}

#[async_trait]
impl TemplateCallback for NestedTemplates {
  async fn resolve_template(
    &self,
    identifier: &str,
    params: Map<String, Value>,
    depth: usize,
  ) -> Result<Value, LogicError> {
    let output = self
      .resolver
      .resolve_at_depth(identifier, params, depth)
      .await
      .map_err(|e| LogicError::Resolve {
        identifier: identifier.to_string(),
        message: e.to_string(),
      })?;
    Ok(output.to_legacy_json())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
  }

  fn params(value: Value) -> Map<String, Value> {
    serde_json::from_value(value).unwrap()
  }

  #[test]
  fn test_positional_binds_first_declared() {
    let mapped = map_positional_params(&names(&["entityName"]), params(json!({ "0": "PUMP1" })));
    assert_eq!(mapped["entityName"], json!("PUMP1"));
    assert_eq!(mapped["0"], json!("PUMP1"));
  }

  #[test]
  fn test_positional_ambiguous_binds_first() {
    let mapped = map_positional_params(
      &names(&["site", "entityName"]),
      params(json!({ "value": "north" })),
    );
    assert_eq!(mapped["site"], json!("north"));
    assert!(!mapped.contains_key("entityName"));
  }

  #[test]
  fn test_positional_leaves_named_params() {
    let named = params(json!({ "entityName": "PUMP1" }));
    assert_eq!(map_positional_params(&names(&["entityName"]), named.clone()), named);

    let two = params(json!({ "a": 1, "b": 2 }));
    assert_eq!(map_positional_params(&names(&["entityName"]), two.clone()), two);

    let one = params(json!({ "a": 1 }));
    assert_eq!(map_positional_params(&[], one.clone()), one);
  }
}
