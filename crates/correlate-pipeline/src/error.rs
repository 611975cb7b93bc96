//! Pipeline error types.

use correlate_config::UnknownFunction;
use correlate_store::StoreError;

/// Errors raised while executing a single step.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
  /// The step names a function outside the vocabulary.
  #[error(transparent)]
  UnknownFunction(#[from] UnknownFunction),

  /// A required field is missing or has the wrong shape.
  #[error("invalid '{field}': {message}")]
  Validation { field: String, message: String },

  /// The document store rejected the query.
  #[error("store query failed: {source}")]
  Store {
    #[from]
    source: StoreError,
  },
}

impl StepError {
  pub(crate) fn validation(field: &str, message: impl Into<String>) -> Self {
    StepError::Validation {
      field: field.to_string(),
      message: message.into(),
    }
  }

  /// Whether the step was rejected before it reached the store.
  pub fn is_validation(&self) -> bool {
    !matches!(self, StepError::Store { .. })
  }
}

/// Errors that abort a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
  /// A step failed. `position` is 1-based.
  #[error("step {position} ({function}) failed: {source}")]
  Step {
    position: usize,
    function: String,
    #[source]
    source: StepError,
  },
}

impl PipelineError {
  pub fn step_error(&self) -> &StepError {
    match self {
      PipelineError::Step { source, .. } => source,
    }
  }
}
