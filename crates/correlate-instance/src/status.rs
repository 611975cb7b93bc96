use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an execution instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
  Pending,
  Initializing,
  Executing,
  Finalizing,
  Completed,
  Error,
}

impl InstanceStatus {
  pub const NON_TERMINAL: [InstanceStatus; 4] = [
    InstanceStatus::Pending,
    InstanceStatus::Initializing,
    InstanceStatus::Executing,
    InstanceStatus::Finalizing,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      InstanceStatus::Pending => "pending",
      InstanceStatus::Initializing => "initializing",
      InstanceStatus::Executing => "executing",
      InstanceStatus::Finalizing => "finalizing",
      InstanceStatus::Completed => "completed",
      InstanceStatus::Error => "error",
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, InstanceStatus::Completed | InstanceStatus::Error)
  }

  /// Whether `next` may follow `self`.
  pub fn can_transition_to(&self, next: InstanceStatus) -> bool {
    use InstanceStatus::*;
    match (self, next) {
      (Pending, Initializing)
      | (Initializing, Executing)
      | (Executing, Finalizing)
      | (Finalizing, Completed) => true,
      (from, Error) => !from.is_terminal(),
      _ => false,
    }
  }
}

impl fmt::Display for InstanceStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_forward_path() {
    use InstanceStatus::*;
    let path = [Pending, Initializing, Executing, Finalizing, Completed];
    for pair in path.windows(2) {
      assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
    }
  }

  #[test]
  fn test_error_from_any_non_terminal() {
    for status in InstanceStatus::NON_TERMINAL {
      assert!(status.can_transition_to(InstanceStatus::Error));
    }
    assert!(!InstanceStatus::Completed.can_transition_to(InstanceStatus::Error));
    assert!(!InstanceStatus::Error.can_transition_to(InstanceStatus::Error));
  }

  #[test]
  fn test_rejected_transitions() {
    use InstanceStatus::*;
    assert!(!Pending.can_transition_to(Executing));
    assert!(!Executing.can_transition_to(Pending));
    assert!(!Completed.can_transition_to(Pending));
    assert!(!Finalizing.can_transition_to(Finalizing));
  }

  #[test]
  fn test_serde_names() {
    assert_eq!(
      serde_json::to_value(InstanceStatus::Finalizing).unwrap(),
      serde_json::json!("finalizing")
    );
  }
}
