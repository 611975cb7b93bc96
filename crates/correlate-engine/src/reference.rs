use std::fmt;

/// How a caller addresses a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateRef {
  /// A document id: 24 hex characters or a UUID. Matched on `_id` only.
  Id(String),
  /// Matched against pipeline statements and the template name.
  Name(String),
}

impl TemplateRef {
  pub fn parse(identifier: &str) -> Self {
    let trimmed = identifier.trim();
    let is_object_id = trimmed.len() == 24 && trimmed.chars().all(|c| c.is_ascii_hexdigit());
    if is_object_id || uuid::Uuid::parse_str(trimmed).is_ok() {
      TemplateRef::Id(trimmed.to_string())
    } else {
      TemplateRef::Name(identifier.to_string())
    }
  }

  pub fn as_str(&self) -> &str {
    match self {
      TemplateRef::Id(s) | TemplateRef::Name(s) => s,
    }
  }
}

impl fmt::Display for TemplateRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse() {
    assert_eq!(
      TemplateRef::parse("65a1f0c2e4b0a1b2c3d4e5f6"),
      TemplateRef::Id("65a1f0c2e4b0a1b2c3d4e5f6".into())
    );
    assert_eq!(
      TemplateRef::parse("0b6c2a4e-3f1d-4c5b-9a8e-7d6c5b4a3f2e"),
      TemplateRef::Id("0b6c2a4e-3f1d-4c5b-9a8e-7d6c5b4a3f2e".into())
    );
    assert_eq!(
      TemplateRef::parse("pump readings"),
      TemplateRef::Name("pump readings".into())
    );
    assert_eq!(
      TemplateRef::parse("65a1f0c2e4b0a1b2c3d4e5fz"),
      TemplateRef::Name("65a1f0c2e4b0a1b2c3d4e5fz".into())
    );
  }
}
