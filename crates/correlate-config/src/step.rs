use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::function::{StepFunction, UnknownFunction};

/// One declarative step of a pipeline.
///
/// Which fields matter depends on `function`:
///
/// | function         | fields                                                    |
/// |------------------|-----------------------------------------------------------|
/// | `findOne`        | `collection`, `filter`, `projection`                      |
/// | `find`           | `collection`, `filter`, `projection`, `sort`, `limit`, `skip` |
/// | `aggregate`      | `collection`, `pipeline`                                  |
/// | `lookup`         | `from`, `localField`, `foreignField`, `filter`, `projection` |
/// | `count`          | `collection`, `filter`                                    |
/// | `sum`            | `collection`, `field`, `filter`                           |
/// | `joinAttributes` | `left`, `right`, `localField`, `foreignField`, `mergeFields`, `filter`, `projection` |
///
/// Values such as `filter` may contain expressions (`$params.name`,
/// `$entity._id`) that are substituted against the running context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDef {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,

  /// Function name; parsed lazily so that an unknown function fails the step
  /// rather than the whole template load.
  pub function: String,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub collection: Option<String>,

  /// Foreign collection for `lookup`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub from: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub filter: Option<Value>,

  /// Aggregation stages for `aggregate`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub pipeline: Option<Value>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub projection: Option<Value>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sort: Option<Value>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub limit: Option<Value>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub skip: Option<Value>,

  /// For `lookup`, an expression producing the local value(s).
  /// For `joinAttributes`, the field name on left records.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub local_field: Option<Value>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub foreign_field: Option<String>,

  /// Numeric field summed by `sum`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub field: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub left: Option<Value>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub right: Option<Value>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub merge_fields: Option<Vec<String>>,

  /// Only read by dependency analysis.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub start_with: Option<Value>,

  /// Marks a `findOne` whose absence is expected to break later steps.
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub required: bool,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output: Option<String>,
}

impl StepDef {
  /// Parse the function name.
  pub fn kind(&self) -> Result<StepFunction, UnknownFunction> {
    self.function.parse()
  }

  /// Context key this step writes: `output`, falling back to `id`.
  pub fn output_key(&self) -> Option<&str> {
    self
      .output
      .as_deref()
      .or(self.id.as_deref())
      .filter(|k| !k.is_empty())
  }

  /// Collection the step reads from. `lookup` prefers `from`.
  pub fn source_collection(&self) -> Option<&str> {
    let collection = match self.kind() {
      Ok(StepFunction::Lookup) => self.from.as_deref().or(self.collection.as_deref()),
      _ => self.collection.as_deref().or(self.from.as_deref()),
    };
    collection.filter(|c| !c.is_empty())
  }

  /// Fields scanned for context references during dependency analysis.
  pub fn reference_fields(&self) -> [(&'static str, Option<&Value>); 6] {
    [
      ("filter", self.filter.as_ref()),
      ("pipeline", self.pipeline.as_ref()),
      ("localField", self.local_field.as_ref()),
      ("startWith", self.start_with.as_ref()),
      ("left", self.left.as_ref()),
      ("right", self.right.as_ref()),
    ]
  }
}
