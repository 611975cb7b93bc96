//! Correlate Pipeline
//!
//! Interprets pipeline steps against a [`DocumentStore`](correlate_store::DocumentStore).
//!
//! - [`execute_step`] runs one step and records its value in the context
//! - [`PipelineRunner`] runs steps in order, optionally stopping early
//! - [`preview`] runs a prefix of the steps and reports per-stage timings
//! - [`stage_info`] and [`validate_steps`] inspect steps without running them

mod context;
mod error;
mod join;
mod preview;
mod runner;
mod stages;
mod step;
mod validate;

pub use context::{ExecutionContext, PipelineOutput, Provenance};
pub use error::{PipelineError, StepError};
pub use preview::{ExecutionInfo, PreviewOptions, PreviewResult, preview};
pub use runner::{PipelineRunner, RunReport, StageTiming};
pub use stages::{StageInfo, stage_info};
pub use step::execute_step;
pub use validate::{ValidationReport, validate_input_schema, validate_steps};
