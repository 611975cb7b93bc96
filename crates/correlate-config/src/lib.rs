//! Correlate Config
//!
//! This crate contains the serializable template definitions for correlate.
//! These types represent templates as they are stored in the document store,
//! before the engine loads them and executes their pipelines.
//!
//! Templates can be loaded from:
//! - The templates collection of a document store (as JSON documents)
//! - JSON files (via the CLI `import` and `validate` commands)

mod function;
mod schema;
mod step;
mod template;

pub use function::{StepFunction, UnknownFunction};
pub use schema::{declared_input_names, normalize_statement};
pub use step::StepDef;
pub use template::{InternalSchema, PipelineDef, TemplateDef};
