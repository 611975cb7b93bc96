use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::status::InstanceStatus;

/// One stretch of time an instance spent in a status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEntry {
  pub status: InstanceStatus,
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub start_time: DateTime<Utc>,
  #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
  pub end_time: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
}

/// A tracked template execution, as stored in the instances collection.
///
/// Timestamps are stored as epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionInstance {
  #[serde(rename = "_id")]
  pub id: String,
  pub instance_id: String,
  #[serde(default)]
  pub template_id: Option<String>,
  #[serde(default)]
  pub template_name: Option<String>,
  #[serde(default)]
  pub input_parameters: Map<String, Value>,
  pub status: InstanceStatus,
  #[serde(default)]
  pub result: Option<Value>,
  #[serde(default)]
  pub error_message: Option<String>,
  #[serde(default)]
  pub status_history: Vec<StatusEntry>,
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub last_heartbeat: DateTime<Utc>,
  pub heartbeat_active: bool,
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub created_at: DateTime<Utc>,
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub updated_at: DateTime<Utc>,
  #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
  pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionInstance {
  /// Non-terminal with a heartbeat older than `stale_after`.
  pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
    if self.status.is_terminal() {
      return false;
    }
    let age = now.signed_duration_since(self.last_heartbeat);
    age.num_milliseconds() > stale_after.as_millis() as i64
  }

  pub fn heartbeat_health(&self, now: DateTime<Utc>, stale_after: Duration) -> HeartbeatHealth {
    if self.status.is_terminal() || !self.heartbeat_active {
      HeartbeatHealth::Stopped
    } else if self.is_stale(now, stale_after) {
      HeartbeatHealth::Stale
    } else {
      HeartbeatHealth::Healthy
    }
  }

  pub fn summary(&self, now: DateTime<Utc>, stale_after: Duration) -> InstanceSummary {
    InstanceSummary {
      instance_id: self.instance_id.clone(),
      template_id: self.template_id.clone(),
      template_name: self.template_name.clone(),
      status: self.status,
      heartbeat_active: self.heartbeat_active,
      last_heartbeat: self.last_heartbeat,
      heartbeat_health: self.heartbeat_health(now, stale_after),
      created_at: self.created_at,
      updated_at: self.updated_at,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatHealth {
  Healthy,
  Stale,
  Stopped,
}

/// Listing view of an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSummary {
  pub instance_id: String,
  pub template_id: Option<String>,
  pub template_name: Option<String>,
  pub status: InstanceStatus,
  pub heartbeat_active: bool,
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub last_heartbeat: DateTime<Utc>,
  pub heartbeat_health: HeartbeatHealth,
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub created_at: DateTime<Utc>,
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub updated_at: DateTime<Utc>,
}
