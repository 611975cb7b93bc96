//! Sequential pipeline runner.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use correlate_config::StepDef;
use correlate_store::DocumentStore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info, instrument};

use crate::context::{ExecutionContext, PipelineOutput};
use crate::error::PipelineError;
use crate::step::execute_step;

/// Timing for one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTiming {
  pub index: usize,
  pub function: String,
  pub output: Option<String>,
  pub duration_ms: u64,
  /// Array length, 1 for a present single value, 0 for `null`.
  pub result_count: usize,
}

/// Outcome of a (possibly bounded) run.
#[derive(Debug, Clone)]
pub struct RunReport {
  pub output: PipelineOutput,
  pub stages: Vec<StageTiming>,
  pub duration_ms: u64,
}

/// Runs pipeline steps in order against a document store.
///
/// Steps run one after another and share one context. There are no retries;
/// the first failing step aborts the run.
#[derive(Clone)]
pub struct PipelineRunner {
  store: Arc<dyn DocumentStore>,
}

impl PipelineRunner {
  pub fn new(store: Arc<dyn DocumentStore>) -> Self {
    Self { store }
  }

  /// Run every step.
  pub async fn run(
    &self,
    steps: &[StepDef],
    params: &Map<String, Value>,
  ) -> Result<PipelineOutput, PipelineError> {
    Ok(self.run_until(steps, params, None).await?.output)
  }

  /// Run steps `0..=stop_after` (or all steps when `None`).
  #[instrument(name = "pipeline_run", skip(self, steps, params), fields(steps = steps.len()))]
  pub async fn run_until(
    &self,
    steps: &[StepDef],
    params: &Map<String, Value>,
    stop_after: Option<usize>,
  ) -> Result<RunReport, PipelineError> {
    let declared: BTreeSet<String> = steps
      .iter()
      .filter_map(|s| s.output_key().map(str::to_string))
      .collect();

    let last = match stop_after {
      Some(k) => k.min(steps.len().saturating_sub(1)),
      None => steps.len().saturating_sub(1),
    };
    let selected = if steps.is_empty() { &[][..] } else { &steps[..=last] };

    let started = Instant::now();
    let mut context = ExecutionContext::default();
    let mut stages = Vec::with_capacity(selected.len());

    for (index, step) in selected.iter().enumerate() {
      let step_started = Instant::now();
      let value = execute_step(self.store.as_ref(), step, &mut context, params, &declared)
        .await
        .map_err(|source| {
          let validation = source.is_validation();
          let e = PipelineError::Step {
            position: index + 1,
            function: step.function.clone(),
            source,
          };
          error!(
            position = index + 1,
            function = %step.function,
            validation,
            error = %e,
            "step_failed"
          );
          e
        })?;

      let timing = StageTiming {
        index,
        function: step.function.clone(),
        output: step.output_key().map(str::to_string),
        duration_ms: step_started.elapsed().as_millis() as u64,
        result_count: result_count(&value),
      };
      info!(
        position = index + 1,
        function = %step.function,
        output = timing.output.as_deref().unwrap_or(""),
        result_count = timing.result_count,
        duration_ms = timing.duration_ms,
        "step_completed"
      );
      stages.push(timing);
    }

    Ok(RunReport {
      output: context.into_output(),
      stages,
      duration_ms: started.elapsed().as_millis() as u64,
    })
  }
}

fn result_count(value: &Value) -> usize {
  match value {
    Value::Array(items) => items.len(),
    Value::Null => 0,
    _ => 1,
  }
}
