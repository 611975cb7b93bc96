use std::time::Duration;

/// Errors raised by logic execution.
#[derive(Debug, thiserror::Error)]
pub enum LogicError {
  /// The script raised an error or returned something that is not JSON.
  #[error("logic execution failed: {message}")]
  Execution { message: String },

  /// The script did not compile.
  #[error("logic execution failed: syntax error: {message}")]
  Syntax { message: String },

  #[error("logic execution failed: timed out after {0:?}")]
  Timeout(Duration),

  #[error("logic execution failed: memory limit of {0} bytes exceeded")]
  MemoryLimit(usize),

  /// Nested `resolve` calls went deeper than allowed.
  #[error("logic execution failed: resolve nesting depth {0} exceeds the limit")]
  DepthExceeded(usize),

  /// A nested template could not be resolved.
  #[error("logic execution failed: resolve('{identifier}') failed: {message}")]
  Resolve { identifier: String, message: String },
}

impl LogicError {
  pub(crate) fn execution(message: impl Into<String>) -> Self {
    LogicError::Execution {
      message: message.into(),
    }
  }
}
