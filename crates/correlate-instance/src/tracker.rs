use std::sync::Arc;
use std::time::Duration;

use correlate_store::{DocumentStore, FindOptions};
use serde_json::{Map, Value, json};
use tracing::{info, instrument, warn};

use crate::clock::Clock;
use crate::error::InstanceError;
use crate::record::{ExecutionInstance, StatusEntry};
use crate::status::InstanceStatus;

/// Message recorded on instances reaped by the health sweep.
pub const STALE_MESSAGE: &str = "heartbeat went stale";

/// Reads and writes instance records.
#[derive(Clone)]
pub struct InstanceTracker {
  store: Arc<dyn DocumentStore>,
  collection: String,
  clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for InstanceTracker {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("InstanceTracker")
      .field("collection", &self.collection)
      .field("clock", &self.clock)
      .finish_non_exhaustive()
  }
}

impl InstanceTracker {
  pub fn new(
    store: Arc<dyn DocumentStore>,
    collection: impl Into<String>,
    clock: Arc<dyn Clock>,
  ) -> Self {
    Self {
      store,
      collection: collection.into(),
      clock,
    }
  }

  pub fn clock(&self) -> &Arc<dyn Clock> {
    &self.clock
  }

  /// Create a `pending` instance with an active heartbeat.
  #[instrument(name = "instance_create", skip(self, params))]
  pub async fn create(
    &self,
    template_id: Option<String>,
    template_name: Option<String>,
    params: Map<String, Value>,
  ) -> Result<ExecutionInstance, InstanceError> {
    let now = self.clock.now();
    let instance_id = uuid::Uuid::new_v4().to_string();
    let instance = ExecutionInstance {
      id: instance_id.clone(),
      instance_id,
      template_id,
      template_name,
      input_parameters: params,
      status: InstanceStatus::Pending,
      result: None,
      error_message: None,
      status_history: vec![StatusEntry {
        status: InstanceStatus::Pending,
        start_time: now,
        end_time: None,
        message: None,
      }],
      last_heartbeat: now,
      heartbeat_active: true,
      created_at: now,
      updated_at: now,
      completed_at: None,
    };

    self
      .store
      .insert_one(&self.collection, serde_json::to_value(&instance)?)
      .await?;
    info!(instance_id = %instance.instance_id, "instance_created");
    Ok(instance)
  }

  pub async fn get(&self, instance_id: &str) -> Result<ExecutionInstance, InstanceError> {
    let doc = self
      .store
      .find_one(
        &self.collection,
        &json!({ "instanceId": instance_id }),
        FindOptions::default(),
      )
      .await?
      .ok_or_else(|| InstanceError::NotFound(instance_id.to_string()))?;
    Ok(serde_json::from_value(doc)?)
  }

  /// Every instance, newest first.
  pub async fn list(&self) -> Result<Vec<ExecutionInstance>, InstanceError> {
    let docs = self
      .store
      .find(
        &self.collection,
        &json!({}),
        FindOptions {
          sort: Some(json!({ "createdAt": -1 })),
          ..Default::default()
        },
      )
      .await?;
    docs
      .into_iter()
      .map(|d| serde_json::from_value(d).map_err(InstanceError::from))
      .collect()
  }

  /// Move an instance to `next`, closing the open history entry.
  pub async fn transition(
    &self,
    instance_id: &str,
    next: InstanceStatus,
    message: Option<String>,
  ) -> Result<ExecutionInstance, InstanceError> {
    self
      .transition_with(instance_id, next, message, Map::new())
      .await
  }

  /// Like [`transition`](Self::transition), also setting `fields` in the
  /// same write.
  pub async fn transition_with(
    &self,
    instance_id: &str,
    next: InstanceStatus,
    message: Option<String>,
    fields: Map<String, Value>,
  ) -> Result<ExecutionInstance, InstanceError> {
    let mut instance = self.get(instance_id).await?;
    let current = instance.status;
    if !current.can_transition_to(next) {
      return Err(InstanceError::InvalidTransition {
        from: current,
        to: next,
      });
    }

    let now = self.clock.now();
    for entry in instance.status_history.iter_mut() {
      if entry.end_time.is_none() {
        entry.end_time = Some(now);
      }
    }
    instance.status_history.push(StatusEntry {
      status: next,
      start_time: now,
      end_time: next.is_terminal().then_some(now),
      message: message.clone(),
    });
    instance.status = next;
    instance.updated_at = now;

    let mut set = fields;
    set.insert("status".into(), serde_json::to_value(next)?);
    set.insert(
      "statusHistory".into(),
      serde_json::to_value(&instance.status_history)?,
    );
    set.insert("updatedAt".into(), json!(now.timestamp_millis()));
    if next.is_terminal() {
      instance.heartbeat_active = false;
      instance.completed_at = Some(now);
      set.insert("heartbeatActive".into(), json!(false));
      set.insert("completedAt".into(), json!(now.timestamp_millis()));
    }
    if next == InstanceStatus::Error {
      instance.error_message = message.clone();
      set.insert("errorMessage".into(), json!(message));
    }
    if let Some(result) = set.get("result") {
      instance.result = Some(result.clone());
    }

    let updated = self
      .store
      .update_one(
        &self.collection,
        &json!({ "instanceId": instance_id, "status": current.as_str() }),
        &json!({ "$set": set }),
      )
      .await?;
    if updated.matched_count == 0 {
      return Err(InstanceError::Conflict(instance_id.to_string()));
    }

    info!(
      instance_id,
      from = %current,
      to = %next,
      "instance_transitioned"
    );
    Ok(instance)
  }

  /// Complete an instance with its result.
  pub async fn complete(
    &self,
    instance_id: &str,
    result: Value,
  ) -> Result<ExecutionInstance, InstanceError> {
    let mut fields = Map::new();
    fields.insert("result".into(), result);
    self
      .transition_with(instance_id, InstanceStatus::Completed, None, fields)
      .await
  }

  pub async fn fail(
    &self,
    instance_id: &str,
    message: impl Into<String>,
  ) -> Result<ExecutionInstance, InstanceError> {
    self
      .transition(instance_id, InstanceStatus::Error, Some(message.into()))
      .await
  }

  /// Refresh `lastHeartbeat` if the heartbeat is still active.
  ///
  /// Returns `false` once the instance stopped heartbeating (it reached a
  /// terminal state or was reaped).
  pub async fn heartbeat(&self, instance_id: &str) -> Result<bool, InstanceError> {
    let now = self.clock.now().timestamp_millis();
    let updated = self
      .store
      .update_one(
        &self.collection,
        &json!({ "instanceId": instance_id, "heartbeatActive": true }),
        &json!({ "$set": { "lastHeartbeat": now } }),
      )
      .await?;
    Ok(updated.matched_count > 0)
  }

  /// Non-terminal instances whose heartbeat is older than `stale_after`.
  pub async fn find_stale(
    &self,
    stale_after: Duration,
  ) -> Result<Vec<ExecutionInstance>, InstanceError> {
    let cutoff = self.clock.now().timestamp_millis() - stale_after.as_millis() as i64;
    let non_terminal: Vec<&str> = InstanceStatus::NON_TERMINAL
      .iter()
      .map(InstanceStatus::as_str)
      .collect();
    let docs = self
      .store
      .find(
        &self.collection,
        &json!({
          "status": { "$in": non_terminal },
          "lastHeartbeat": { "$lt": cutoff }
        }),
        FindOptions::default(),
      )
      .await?;
    docs
      .into_iter()
      .map(|d| serde_json::from_value(d).map_err(InstanceError::from))
      .collect()
  }

  /// Move every stale instance to `error`. Returns the reaped instance ids.
  ///
  /// Instances that change status while being reaped are skipped.
  #[instrument(name = "instance_reap_stale", skip(self))]
  pub async fn reap_stale(&self, stale_after: Duration) -> Result<Vec<String>, InstanceError> {
    let mut reaped = Vec::new();
    for instance in self.find_stale(stale_after).await? {
      match self.fail(&instance.instance_id, STALE_MESSAGE).await {
        Ok(_) => {
          warn!(
            instance_id = %instance.instance_id,
            last_heartbeat = %instance.last_heartbeat,
            "stale_instance_reaped"
          );
          reaped.push(instance.instance_id);
        }
        Err(InstanceError::Conflict(_)) | Err(InstanceError::InvalidTransition { .. }) => {}
        Err(e) => return Err(e),
      }
    }
    Ok(reaped)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use chrono::{TimeZone, Utc};
  use correlate_store::MemoryStore;

  fn tracker() -> (InstanceTracker, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
      Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
    ));
    let tracker = InstanceTracker::new(
      Arc::new(MemoryStore::new()),
      "correlationInstances",
      clock.clone(),
    );
    (tracker, clock)
  }

  #[tokio::test]
  async fn test_full_lifecycle_history() {
    let (tracker, clock) = tracker();
    let instance = tracker.create(Some("t1".into()), None, Map::new()).await.unwrap();
    let id = instance.instance_id.clone();

    let mut lengths = vec![1];
    for next in [
      InstanceStatus::Initializing,
      InstanceStatus::Executing,
      InstanceStatus::Finalizing,
    ] {
      clock.advance(Duration::from_millis(5));
      let updated = tracker.transition(&id, next, None).await.unwrap();
      lengths.push(updated.status_history.len());
      let open = updated
        .status_history
        .iter()
        .filter(|e| e.end_time.is_none())
        .count();
      assert_eq!(open, 1);
    }
    let done = tracker.complete(&id, json!({ "ok": true })).await.unwrap();
    lengths.push(done.status_history.len());

    assert_eq!(lengths, vec![1, 2, 3, 4, 5]);
    let stored = tracker.get(&id).await.unwrap();
    assert_eq!(stored.status, InstanceStatus::Completed);
    assert_eq!(stored.result, Some(json!({ "ok": true })));
    assert!(!stored.heartbeat_active);
    assert!(stored.completed_at.is_some());
    assert!(stored.status_history.iter().all(|e| e.end_time.is_some()));
    assert_eq!(stored, done);
  }

  #[tokio::test]
  async fn test_invalid_transition_rejected() {
    let (tracker, _) = tracker();
    let instance = tracker.create(None, None, Map::new()).await.unwrap();
    let err = tracker
      .transition(&instance.instance_id, InstanceStatus::Completed, None)
      .await
      .unwrap_err();
    assert!(matches!(err, InstanceError::InvalidTransition { .. }));

    tracker.fail(&instance.instance_id, "boom").await.unwrap();
    let err = tracker.fail(&instance.instance_id, "again").await.unwrap_err();
    assert!(matches!(err, InstanceError::InvalidTransition { .. }));

    let stored = tracker.get(&instance.instance_id).await.unwrap();
    assert_eq!(stored.error_message.as_deref(), Some("boom"));
  }

  #[tokio::test]
  async fn test_missing_instance() {
    let (tracker, _) = tracker();
    assert!(matches!(
      tracker.get("nope").await.unwrap_err(),
      InstanceError::NotFound(_)
    ));
  }

  #[tokio::test]
  async fn test_reap_stale_instances() {
    let (tracker, clock) = tracker();
    let stale = tracker.create(None, None, Map::new()).await.unwrap();
    clock.advance(Duration::from_secs(20));
    let fresh = tracker.create(None, None, Map::new()).await.unwrap();
    let done = tracker.create(None, None, Map::new()).await.unwrap();
    tracker.fail(&done.instance_id, "finished badly").await.unwrap();

    clock.advance(Duration::from_secs(15));
    let reaped = tracker.reap_stale(Duration::from_secs(30)).await.unwrap();
    assert_eq!(reaped, vec![stale.instance_id.clone()]);

    let stale = tracker.get(&stale.instance_id).await.unwrap();
    assert_eq!(stale.status, InstanceStatus::Error);
    assert_eq!(stale.error_message.as_deref(), Some(STALE_MESSAGE));
    assert!(!stale.heartbeat_active);

    let fresh = tracker.get(&fresh.instance_id).await.unwrap();
    assert_eq!(fresh.status, InstanceStatus::Pending);
    assert!(tracker.reap_stale(Duration::from_secs(30)).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_heartbeat_stops_after_terminal() {
    let (tracker, clock) = tracker();
    let instance = tracker.create(None, None, Map::new()).await.unwrap();
    clock.advance(Duration::from_secs(10));
    assert!(tracker.heartbeat(&instance.instance_id).await.unwrap());
    let stored = tracker.get(&instance.instance_id).await.unwrap();
    assert_eq!(stored.last_heartbeat, clock.now());

    tracker.fail(&instance.instance_id, "x").await.unwrap();
    assert!(!tracker.heartbeat(&instance.instance_id).await.unwrap());
  }
}
