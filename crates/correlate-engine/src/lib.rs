//! Correlate Engine
//!
//! The entry point for running correlation templates.
//!
//! [`CorrelationEngine`] loads templates from a document store, maps caller
//! parameters, runs each pipeline, applies post-processing logic, and
//! optionally tracks the run as an execution instance with heartbeats.
//! [`HealthMonitor`] periodically reaps instances whose heartbeat went quiet.

mod config;
mod engine;
mod error;
mod monitor;
mod output;
mod reference;
mod resolver;

pub use config::EngineConfig;
pub use engine::{CorrelationEngine, InstanceStatusView, SweepReport, TrackedRun};
pub use error::EngineError;
pub use monitor::HealthMonitor;
pub use output::{NamedPipelineOutput, TemplateOutput};
pub use reference::TemplateRef;
pub use resolver::{TemplateResolver, map_positional_params};
