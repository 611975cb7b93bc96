//! Partial execution for pipeline authoring.

use correlate_config::StepDef;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PipelineError;
use crate::runner::{PipelineRunner, StageTiming};

/// Which steps a preview executes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewOptions {
  pub execute_all: bool,
  /// Last step to run (0-based). Indices past the end run every step.
  pub stage_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionInfo {
  pub total_stages: usize,
  pub executed_stages: usize,
  pub stage_index: Option<usize>,
  pub execute_all: bool,
  pub duration_ms: u64,
  pub stages: Vec<StageTiming>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResult {
  pub ctx: Map<String, Value>,
  pub ctx_id: Map<String, Value>,
  pub execution_info: ExecutionInfo,
}

/// Run a prefix of `steps` and report what ran.
pub async fn preview(
  runner: &PipelineRunner,
  steps: &[StepDef],
  params: &Map<String, Value>,
  options: PreviewOptions,
) -> Result<PreviewResult, PipelineError> {
  let stop_after = if options.execute_all {
    None
  } else {
    options.stage_index
  };
  let report = runner.run_until(steps, params, stop_after).await?;

  Ok(PreviewResult {
    ctx: report.output.ctx,
    ctx_id: report.output.ctx_id,
    execution_info: ExecutionInfo {
      total_stages: steps.len(),
      executed_stages: report.stages.len(),
      stage_index: options.stage_index,
      execute_all: options.execute_all,
      duration_ms: report.duration_ms,
      stages: report.stages,
    },
  })
}
