use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::tracker::InstanceTracker;

struct HeartbeatTask {
  generation: u64,
  cancel: CancellationToken,
  handle: JoinHandle<()>,
}

type Registry = Arc<Mutex<HashMap<String, HeartbeatTask>>>;

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<String, HeartbeatTask>> {
  registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owns one heartbeat task per live instance.
///
/// Each task refreshes `lastHeartbeat` every `interval` and ends on its own
/// once the instance stops heartbeating. The registry is process local.
#[derive(Clone)]
pub struct HeartbeatManager {
  tracker: InstanceTracker,
  interval: Duration,
  tasks: Registry,
  generation: Arc<AtomicU64>,
}

impl HeartbeatManager {
  pub fn new(tracker: InstanceTracker, interval: Duration) -> Self {
    Self {
      tracker,
      interval,
      tasks: Arc::new(Mutex::new(HashMap::new())),
      generation: Arc::new(AtomicU64::new(0)),
    }
  }

  /// Start heartbeating `instance_id`, replacing any existing task for it.
  pub fn start(&self, instance_id: &str) {
    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(run_heartbeat(
      self.tracker.clone(),
      instance_id.to_string(),
      self.interval,
      cancel.clone(),
      self.tasks.clone(),
      generation,
    ));

    let previous = lock(&self.tasks).insert(
      instance_id.to_string(),
      HeartbeatTask {
        generation,
        cancel,
        handle,
      },
    );
    if let Some(previous) = previous {
      previous.cancel.cancel();
    }
    debug!(instance_id, "heartbeat_started");
  }

  /// Stop heartbeating `instance_id`. Returns whether a task was running.
  pub fn stop(&self, instance_id: &str) -> bool {
    match lock(&self.tasks).remove(instance_id) {
      Some(task) => {
        task.cancel.cancel();
        debug!(instance_id, "heartbeat_stopped");
        true
      }
      None => false,
    }
  }

  pub fn is_active(&self, instance_id: &str) -> bool {
    lock(&self.tasks).contains_key(instance_id)
  }

  pub fn active_count(&self) -> usize {
    lock(&self.tasks).len()
  }

  /// Cancel every heartbeat task and wait for them to finish.
  pub async fn shutdown(&self) {
    let tasks: Vec<HeartbeatTask> = lock(&self.tasks).drain().map(|(_, t)| t).collect();
    let count = tasks.len();
    for task in &tasks {
      task.cancel.cancel();
    }
    for task in tasks {
      let _ = task.handle.await;
    }
    info!(count, "heartbeats_shut_down");
  }
}

async fn run_heartbeat(
  tracker: InstanceTracker,
  instance_id: String,
  interval: Duration,
  cancel: CancellationToken,
  registry: Registry,
  generation: u64,
) {
  let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      _ = cancel.cancelled() => return,
      _ = ticker.tick() => {
        match tracker.heartbeat(&instance_id).await {
          Ok(true) => debug!(instance_id = %instance_id, "heartbeat"),
          Ok(false) => {
            debug!(instance_id = %instance_id, "heartbeat no longer active");
            break;
          }
          Err(e) => warn!(instance_id = %instance_id, error = %e, "heartbeat_failed"),
        }
      }
    }
  }

  let mut tasks = lock(&registry);
  if tasks.get(&instance_id).is_some_and(|t| t.generation == generation) {
    tasks.remove(&instance_id);
  }
}
