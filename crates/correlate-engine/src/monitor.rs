//! Periodic heartbeat health sweeps.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::engine::CorrelationEngine;

/// Runs [`CorrelationEngine::run_heartbeat_health_sweep`] on an interval.
///
/// # Usage
///
/// ```ignore
/// let monitor = HealthMonitor::new(engine.clone());
/// let cancel = CancellationToken::new();
/// tokio::spawn(monitor.start(cancel.clone()));
/// ```
pub struct HealthMonitor {
  engine: CorrelationEngine,
  interval: Duration,
}

impl HealthMonitor {
  /// Sweep at the engine's configured interval.
  pub fn new(engine: CorrelationEngine) -> Self {
    let interval = engine.config().sweep_interval();
    Self::with_interval(engine, interval)
  }

  pub fn with_interval(engine: CorrelationEngine, interval: Duration) -> Self {
    Self { engine, interval }
  }

  /// Sweep until `cancel` fires. The first sweep runs immediately.
  ///
  /// Returns the total number of instances reaped.
  pub async fn start(self, cancel: CancellationToken) -> usize {
    info!(interval_ms = self.interval.as_millis() as u64, "starting health monitor");
    let mut ticker = tokio::time::interval(self.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut total = 0;

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!(total_reaped = total, "health monitor cancelled");
          break;
        }
        _ = ticker.tick() => {
          match self.engine.run_heartbeat_health_sweep().await {
            Ok(report) => total += report.stale_instances_reaped,
            Err(e) => error!(error = %e, "health sweep failed"),
          }
        }
      }
    }

    total
  }
}
