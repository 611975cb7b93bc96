//! Correlate Logic
//!
//! Runs template post-processing logic written in Lua 5.4 inside a
//! restricted interpreter. Each call gets a fresh state with only the
//! `table`, `string`, `math` and `utf8` libraries, a memory ceiling and a
//! wall-clock timeout.
//!
//! Scripts see every pipeline result and every parameter as a global, plus:
//!
//! - `params`, `results`: the same values as tables
//! - `now_ms()`, `now_iso()`: the current time
//! - `log.debug/info/warn/error(msg)`: tracing events on `correlate::logic`
//! - `resolve(identifier [, params])`: a local result by key, or another
//!   template's result through a [`TemplateCallback`]
//!
//! A result or parameter whose name is already taken by one of these, or by
//! a library such as `string`, is not bound as a global; read it through
//! `results` or `params` instead. A parameter wins over a result of the
//! same name.
//!
//! The script's value is whatever the chunk returns, or the global `result`
//! when it returns nothing.

mod error;
mod limits;
mod sandbox;

pub use error::LogicError;
pub use limits::LogicLimits;
pub use sandbox::{LogicExecutor, TemplateCallback, check_syntax};
