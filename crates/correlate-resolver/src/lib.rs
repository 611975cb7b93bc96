//! Correlate Resolver
//!
//! Substitutes expressions in step definitions against the running context
//! and caller parameters, and extracts the context keys a step depends on.
//!
//! Expression forms inside string values:
//! - `$params.NAME` reads a caller parameter
//! - `$KEY.a.b` reads a context entry produced by an earlier step
//! - a bare word equal to a parameter name is replaced by that parameter
//!
//! Anything else is left as-is, so store-side field paths such as `$amount`
//! inside a `$group` stage reach the store untouched.

mod dependencies;
mod expression;

pub use dependencies::{collect_references, step_dependencies};
pub use expression::{ResolveScope, resolve, resolve_value};
