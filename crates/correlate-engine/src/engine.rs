//! The engine facade.

use std::sync::Arc;

use correlate_config::{InternalSchema, StepDef, TemplateDef};
use correlate_instance::{
  Clock, ExecutionInstance, HeartbeatManager, InstanceStatus, InstanceSummary, InstanceTracker,
  SystemClock,
};
use correlate_logic::check_syntax;
use correlate_pipeline::{
  PreviewOptions, PreviewResult, StageInfo, ValidationReport, preview, stage_info,
  validate_input_schema, validate_steps,
};
use correlate_store::DocumentStore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, instrument, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::output::TemplateOutput;
use crate::reference::TemplateRef;
use crate::resolver::TemplateResolver;

/// The outcome of a tracked run.
#[derive(Debug)]
pub struct TrackedRun {
  pub instance_id: String,
  /// The persisted result, or the error the instance failed with.
  pub outcome: Result<Value, EngineError>,
}

/// An instance record plus its derived staleness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatusView {
  #[serde(flatten)]
  pub instance: ExecutionInstance,
  pub is_stale: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
  pub stale_instances_reaped: usize,
}

/// Runs templates against a document store and tracks their executions.
#[derive(Clone)]
pub struct CorrelationEngine {
  store: Arc<dyn DocumentStore>,
  config: Arc<EngineConfig>,
  resolver: TemplateResolver,
  tracker: InstanceTracker,
  heartbeats: HeartbeatManager,
}

impl CorrelationEngine {
  pub fn new(store: Arc<dyn DocumentStore>, config: EngineConfig) -> Self {
    Self::with_clock(store, config, Arc::new(SystemClock))
  }

  pub fn with_clock(store: Arc<dyn DocumentStore>, config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
    let config = Arc::new(config);
    let tracker = InstanceTracker::new(store.clone(), config.instances_collection.clone(), clock);
    let heartbeats = HeartbeatManager::new(tracker.clone(), config.heartbeat_interval());
    Self {
      resolver: TemplateResolver::new(store.clone(), config.clone()),
      store,
      config,
      tracker,
      heartbeats,
    }
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  pub fn heartbeats(&self) -> &HeartbeatManager {
    &self.heartbeats
  }

  /// Store a template. Returns its id.
  pub async fn save_template(&self, template: &TemplateDef) -> Result<String, EngineError> {
    let document = serde_json::to_value(template).map_err(|e| EngineError::InvalidTemplate {
      identifier: template.name.clone(),
      message: e.to_string(),
    })?;
    let id = self
      .store
      .insert_one(&self.config.templates_collection, document)
      .await?;
    info!(template_id = %id, name = %template.name, "template_saved");
    Ok(id)
  }

  /// Run a template without tracking it.
  pub async fn execute_template(
    &self,
    identifier: &str,
    params: Map<String, Value>,
  ) -> Result<TemplateOutput, EngineError> {
    self.resolver.resolve(identifier, params).await
  }

  /// Run a template as a tracked instance and wait for it to finish.
  ///
  /// Only creating the instance can fail; once it exists, the run's own
  /// failure is reported in [`TrackedRun::outcome`].
  pub async fn execute_tracked(
    &self,
    identifier: &str,
    params: Map<String, Value>,
  ) -> Result<TrackedRun, EngineError> {
    let instance_id = self.start_instance(identifier, &params).await?;
    let outcome = self.drive(&instance_id, identifier, params).await;
    Ok(TrackedRun {
      instance_id,
      outcome,
    })
  }

  /// Start a tracked run in the background. Returns the instance id.
  pub async fn submit(&self, identifier: &str, params: Map<String, Value>) -> Result<String, EngineError> {
    let instance_id = self.start_instance(identifier, &params).await?;
    let engine = self.clone();
    let id = instance_id.clone();
    let identifier = identifier.to_string();
    tokio::spawn(async move {
      if let Err(e) = engine.drive(&id, &identifier, params).await {
        debug!(instance_id = %id, error = %e, "background_run_failed");
      }
    });
    Ok(instance_id)
  }

  async fn start_instance(&self, identifier: &str, params: &Map<String, Value>) -> Result<String, EngineError> {
    let (template_id, template_name) = match TemplateRef::parse(identifier) {
      TemplateRef::Id(id) => (Some(id), None),
      TemplateRef::Name(name) => (None, Some(name)),
    };
    let instance = self
      .tracker
      .create(template_id, template_name, params.clone())
      .await?;
    self.heartbeats.start(&instance.instance_id);
    Ok(instance.instance_id)
  }

  #[instrument(name = "tracked_run", skip(self, params))]
  async fn drive(
    &self,
    instance_id: &str,
    identifier: &str,
    params: Map<String, Value>,
  ) -> Result<Value, EngineError> {
    let outcome = self.run_phases(instance_id, identifier, params).await;
    match &outcome {
      Ok(result) => {
        if let Err(e) = self.tracker.complete(instance_id, result.clone()).await {
          warn!(instance_id, error = %e, "instance_tracking_failed");
        }
        info!(instance_id, "tracked_run_completed");
      }
      Err(e) => {
        error!(instance_id, error = %e, "tracked_run_failed");
        if let Err(track_err) = self.tracker.fail(instance_id, e.to_string()).await {
          warn!(instance_id, error = %track_err, "instance_tracking_failed");
        }
      }
    }
    self.heartbeats.stop(instance_id);
    outcome
  }

  async fn run_phases(
    &self,
    instance_id: &str,
    identifier: &str,
    params: Map<String, Value>,
  ) -> Result<Value, EngineError> {
    self.track(instance_id, InstanceStatus::Initializing, Map::new()).await;
    let template = self.resolver.load(&TemplateRef::parse(identifier)).await?;
    let params = self.resolver.map_params(&template, params);

    let mut fields = Map::new();
    fields.insert("templateId".into(), json!(template.id));
    fields.insert("templateName".into(), json!(template.name));
    fields.insert("inputParameters".into(), Value::Object(params.clone()));
    self.track(instance_id, InstanceStatus::Executing, fields).await;
    let output = self.resolver.execute(&template, &params, 0).await?;

    self.track(instance_id, InstanceStatus::Finalizing, Map::new()).await;
    Ok(output.shaped(template.output_schema.as_ref()))
  }

  /// Record a phase change. Tracking failures never abort the run.
  async fn track(&self, instance_id: &str, next: InstanceStatus, fields: Map<String, Value>) {
    if let Err(e) = self.tracker.transition_with(instance_id, next, None, fields).await {
      warn!(instance_id, to = %next, error = %e, "instance_tracking_failed");
    }
  }

  /// Run a prefix of `steps` for authoring.
  pub async fn preview_pipeline(
    &self,
    steps: &[StepDef],
    params: &Map<String, Value>,
    options: PreviewOptions,
  ) -> Result<PreviewResult, EngineError> {
    preview(self.resolver.runner(), steps, params, options)
      .await
      .map_err(|source| EngineError::Pipeline { pipeline: 1, source })
  }

  pub fn get_stage_info(&self, steps: &[StepDef]) -> Vec<StageInfo> {
    stage_info(steps)
  }

  /// Static checks over a template's pipelines, logic and input schema.
  pub fn validate_template(
    &self,
    schema: &InternalSchema,
    logic_source: Option<&str>,
    input_schema: Option<&Value>,
  ) -> ValidationReport {
    let mut report = ValidationReport::new();
    match schema {
      InternalSchema::Single(pipeline) => {
        report.merge("", validate_steps(&pipeline.pipeline_steps));
      }
      InternalSchema::Multi(pipelines) => {
        if pipelines.is_empty() {
          report.error("internal schema has no pipelines");
        }
        for (i, pipeline) in pipelines.iter().enumerate() {
          let prefix = format!("pipeline {}: ", i + 1);
          report.merge(&prefix, validate_steps(&pipeline.pipeline_steps));
        }
      }
    }
    report.merge("", validate_input_schema(input_schema));
    if let Some(source) = logic_source.filter(|s| !s.trim().is_empty())
      && let Err(e) = check_syntax(source)
    {
      report.error(e.to_string());
    }
    report
  }

  pub async fn get_instance_status(&self, instance_id: &str) -> Result<InstanceStatusView, EngineError> {
    let instance = self.tracker.get(instance_id).await?;
    let is_stale = instance.is_stale(self.tracker.clock().now(), self.config.stale_after());
    Ok(InstanceStatusView { instance, is_stale })
  }

  /// Summaries of every instance, newest first.
  pub async fn list_instance_summaries(&self) -> Result<Vec<InstanceSummary>, EngineError> {
    let now = self.tracker.clock().now();
    let stale_after = self.config.stale_after();
    Ok(
      self
        .tracker
        .list()
        .await?
        .iter()
        .map(|i| i.summary(now, stale_after))
        .collect(),
    )
  }

  /// Fail every instance whose heartbeat went stale.
  pub async fn run_heartbeat_health_sweep(&self) -> Result<SweepReport, EngineError> {
    let reaped = self.tracker.reap_stale(self.config.stale_after()).await?;
    for instance_id in &reaped {
      self.heartbeats.stop(instance_id);
    }
    if !reaped.is_empty() {
      info!(count = reaped.len(), "health_sweep_reaped");
    }
    Ok(SweepReport {
      stale_instances_reaped: reaped.len(),
    })
  }

  /// Stop every heartbeat task. In-flight runs are not interrupted.
  pub async fn shutdown(&self) {
    self.heartbeats.shutdown().await;
  }
}
