use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Resource bounds for one logic evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogicLimits {
  pub memory_limit_bytes: usize,
  pub timeout_ms: u64,
  /// Maximum nesting of `resolve` calls into other templates.
  pub max_depth: usize,
}

impl Default for LogicLimits {
  fn default() -> Self {
    Self {
      memory_limit_bytes: 64 * 1024 * 1024,
      timeout_ms: 30_000,
      max_depth: 8,
    }
  }
}

impl LogicLimits {
  pub fn timeout(&self) -> Duration {
    Duration::from_millis(self.timeout_ms)
  }
}
