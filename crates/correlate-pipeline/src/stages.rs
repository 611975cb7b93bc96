use correlate_config::StepDef;
use correlate_resolver::step_dependencies;
use serde::{Deserialize, Serialize};

/// Static description of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageInfo {
  pub index: usize,
  pub id: Option<String>,
  pub function: String,
  pub collection: Option<String>,
  pub output: Option<String>,
  pub dependencies: Vec<String>,
}

/// Describe every step without running anything.
pub fn stage_info(steps: &[StepDef]) -> Vec<StageInfo> {
  steps
    .iter()
    .enumerate()
    .map(|(index, step)| StageInfo {
      index,
      id: step.id.clone(),
      function: step.function.clone(),
      collection: step.source_collection().map(str::to_string),
      output: step.output_key().map(str::to_string),
      dependencies: step_dependencies(step).into_iter().collect(),
    })
    .collect()
}
