use std::time::Duration;

use correlate_logic::LogicLimits;
use serde::{Deserialize, Serialize};

/// Engine settings. Every field has a default; durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
  pub templates_collection: String,
  pub instances_collection: String,
  pub heartbeat_interval_ms: u64,
  /// Non-terminal instances with an older heartbeat are stale.
  pub stale_after_ms: u64,
  pub sweep_interval_ms: u64,
  pub logic: LogicLimits,
  /// Bind a single unnamed parameter to the first missing declared input.
  pub positional_params: bool,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      templates_collection: "correlationTemplates".to_string(),
      instances_collection: "correlationInstances".to_string(),
      heartbeat_interval_ms: 10_000,
      stale_after_ms: 30_000,
      sweep_interval_ms: 15_000,
      logic: LogicLimits::default(),
      positional_params: true,
    }
  }
}

impl EngineConfig {
  pub fn heartbeat_interval(&self) -> Duration {
    Duration::from_millis(self.heartbeat_interval_ms)
  }

  pub fn stale_after(&self) -> Duration {
    Duration::from_millis(self.stale_after_ms)
  }

  pub fn sweep_interval(&self) -> Duration {
    Duration::from_millis(self.sweep_interval_ms)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_partial_config_uses_defaults() {
    let config: EngineConfig = serde_json::from_value(json!({
      "staleAfterMs": 60000,
      "logic": { "timeoutMs": 1000 }
    }))
    .unwrap();
    assert_eq!(config.stale_after(), Duration::from_secs(60));
    assert_eq!(config.heartbeat_interval(), Duration::from_secs(10));
    assert_eq!(config.logic.timeout_ms, 1000);
    assert_eq!(config.logic.max_depth, 8);
    assert_eq!(config.templates_collection, "correlationTemplates");
    assert!(config.positional_params);
  }
}
