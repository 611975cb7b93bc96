use std::fmt;
use std::str::FromStr;

/// The fixed vocabulary of pipeline step functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepFunction {
  FindOne,
  Find,
  Aggregate,
  Lookup,
  Count,
  Sum,
  JoinAttributes,
}

/// Returned when a step names a function outside the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFunction(pub String);

impl fmt::Display for UnknownFunction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "unknown step function '{}'", self.0)
  }
}

impl std::error::Error for UnknownFunction {}

impl StepFunction {
  pub const ALL: [StepFunction; 7] = [
    StepFunction::FindOne,
    StepFunction::Find,
    StepFunction::Aggregate,
    StepFunction::Lookup,
    StepFunction::Count,
    StepFunction::Sum,
    StepFunction::JoinAttributes,
  ];

  /// The name used in step definitions.
  pub fn as_str(&self) -> &'static str {
    match self {
      StepFunction::FindOne => "findOne",
      StepFunction::Find => "find",
      StepFunction::Aggregate => "aggregate",
      StepFunction::Lookup => "lookup",
      StepFunction::Count => "count",
      StepFunction::Sum => "sum",
      StepFunction::JoinAttributes => "joinAttributes",
    }
  }

  /// Whether the function talks to the document store.
  ///
  /// `joinAttributes` works purely on values already in the context.
  pub fn touches_store(&self) -> bool {
    !matches!(self, StepFunction::JoinAttributes)
  }
}

impl fmt::Display for StepFunction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for StepFunction {
  type Err = UnknownFunction;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    StepFunction::ALL
      .into_iter()
      .find(|f| f.as_str() == s)
      .ok_or_else(|| UnknownFunction(s.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_known_functions() {
    for function in StepFunction::ALL {
      assert_eq!(function.as_str().parse::<StepFunction>(), Ok(function));
    }
  }

  #[test]
  fn test_parse_is_case_sensitive() {
    let err = "FindOne".parse::<StepFunction>().unwrap_err();
    assert_eq!(err, UnknownFunction("FindOne".to_string()));
    assert_eq!(err.to_string(), "unknown step function 'FindOne'");
  }
}
