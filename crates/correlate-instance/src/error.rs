use correlate_store::StoreError;

use crate::status::InstanceStatus;

#[derive(Debug, thiserror::Error)]
pub enum InstanceError {
  #[error("instance not found: {0}")]
  NotFound(String),

  #[error("invalid transition from {from} to {to}")]
  InvalidTransition {
    from: InstanceStatus,
    to: InstanceStatus,
  },

  /// The instance changed status while the transition was being written.
  #[error("instance {0} was modified concurrently")]
  Conflict(String),

  #[error("invalid instance record: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error(transparent)]
  Store(#[from] StoreError),
}
