//! Engine error types.

use correlate_instance::InstanceError;
use correlate_logic::LogicError;
use correlate_pipeline::PipelineError;
use correlate_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error("template not found: {0}")]
  TemplateNotFound(String),

  #[error("instance not found: {0}")]
  InstanceNotFound(String),

  /// The stored template document does not have the expected shape.
  #[error("invalid template '{identifier}': {message}")]
  InvalidTemplate { identifier: String, message: String },

  /// A pipeline failed. Multi-pipeline templates name the pipeline.
  #[error("pipeline {pipeline} failed: {source}")]
  Pipeline {
    pipeline: usize,
    #[source]
    source: PipelineError,
  },

  #[error(transparent)]
  Logic(#[from] LogicError),

  #[error("instance tracking failed: {0}")]
  Instance(#[source] InstanceError),

  #[error("store error: {0}")]
  Store(#[from] StoreError),
}

impl From<InstanceError> for EngineError {
  fn from(e: InstanceError) -> Self {
    match e {
      InstanceError::NotFound(id) => EngineError::InstanceNotFound(id),
      other => EngineError::Instance(other),
    }
  }
}
