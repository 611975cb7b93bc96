//! Step interpretation.

use std::collections::BTreeSet;

use correlate_config::{StepDef, StepFunction};
use correlate_resolver::{ResolveScope, resolve, resolve_value};
use correlate_store::{DocumentStore, FindOptions};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::context::{ExecutionContext, Provenance};
use crate::error::StepError;
use crate::join::join_attributes;

/// Execute one step and record its value under the step's output key.
///
/// `declared` holds every output key of the running pipeline so that
/// references to steps that have not run yet resolve to undefined.
pub async fn execute_step(
  store: &dyn DocumentStore,
  step: &StepDef,
  context: &mut ExecutionContext,
  params: &Map<String, Value>,
  declared: &BTreeSet<String>,
) -> Result<Value, StepError> {
  let function = step.kind()?;
  let output = step
    .output_key()
    .ok_or_else(|| StepError::validation("output", "step has no output key or id"))?
    .to_string();

  let scope = ResolveScope::new(&context.ctx, params).with_declared(declared);
  let collection = step.source_collection().map(str::to_string);

  let value = match function {
    StepFunction::FindOne => find_one(store, step, &scope).await?,
    StepFunction::Find => find(store, step, &scope).await?,
    StepFunction::Aggregate => aggregate(store, step, &scope).await?,
    StepFunction::Lookup => lookup(store, step, &scope).await?,
    StepFunction::Count => count(store, step, &scope).await?,
    StepFunction::Sum => sum(store, step, &scope).await?,
    StepFunction::JoinAttributes => join_attributes(step, &scope)?,
  };

  let provenance = if function.touches_store() {
    Provenance::of(collection.as_deref(), &value)
  } else {
    Provenance::of(None, &value)
  };
  context.record(&output, value.clone(), provenance);
  Ok(value)
}

fn require_collection(step: &StepDef) -> Result<&str, StepError> {
  step
    .source_collection()
    .ok_or_else(|| StepError::validation("collection", "a collection is required"))
}

fn resolved_filter(step: &StepDef, scope: &ResolveScope<'_>) -> Value {
  match &step.filter {
    Some(filter) => match resolve(filter, scope) {
      Value::Null => json!({}),
      other => other,
    },
    None => json!({}),
  }
}

fn resolved_option(value: &Option<Value>, scope: &ResolveScope<'_>) -> Option<Value> {
  value
    .as_ref()
    .and_then(|v| resolve_value(v, scope))
    .filter(|v| !v.is_null())
}

/// Read a `limit`/`skip` value. Numeric strings are accepted.
fn resolved_count(value: &Option<Value>, scope: &ResolveScope<'_>) -> Option<u64> {
  match resolved_option(value, scope)? {
    Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

async fn find_one(
  store: &dyn DocumentStore,
  step: &StepDef,
  scope: &ResolveScope<'_>,
) -> Result<Value, StepError> {
  let collection = require_collection(step)?;
  let filter = resolved_filter(step, scope);
  let options = FindOptions::with_projection(resolved_option(&step.projection, scope));

  match store.find_one(collection, &filter, options).await? {
    Some(doc) => Ok(doc),
    None => {
      if step.required {
        warn!(collection, filter = %filter, "required findOne matched no document");
      } else {
        debug!(collection, filter = %filter, "findOne matched no document");
      }
      Ok(Value::Null)
    }
  }
}

async fn find(
  store: &dyn DocumentStore,
  step: &StepDef,
  scope: &ResolveScope<'_>,
) -> Result<Value, StepError> {
  let collection = require_collection(step)?;
  let filter = resolved_filter(step, scope);
  let options = FindOptions {
    projection: resolved_option(&step.projection, scope),
    sort: resolved_option(&step.sort, scope),
    limit: resolved_count(&step.limit, scope),
    skip: resolved_count(&step.skip, scope),
  };
  let docs = store.find(collection, &filter, options).await?;
  Ok(Value::Array(docs))
}

async fn aggregate(
  store: &dyn DocumentStore,
  step: &StepDef,
  scope: &ResolveScope<'_>,
) -> Result<Value, StepError> {
  let collection = require_collection(step)?;
  let stages = match step.pipeline.as_ref().map(|p| resolve(p, scope)) {
    Some(Value::Array(stages)) => stages,
    _ => {
      return Err(StepError::validation(
        "pipeline",
        "aggregate requires an array of stages",
      ));
    }
  };

  for (index, stage) in stages.iter().enumerate() {
    if let Some(matcher) = stage.get("$match") {
      check_in_operands(matcher).map_err(|path| {
        StepError::validation(
          "pipeline",
          format!(
            "$in operand at stage {} ('{}') must be an array",
            index, path
          ),
        )
      })?;
    }
  }

  let docs = store.aggregate(collection, &stages).await?;
  Ok(Value::Array(docs))
}

/// Find a `$in` whose operand is not an array. Returns the offending path.
fn check_in_operands(value: &Value) -> Result<(), String> {
  fn walk(value: &Value, path: &mut Vec<String>) -> Result<(), String> {
    match value {
      Value::Object(map) => {
        for (key, inner) in map {
          path.push(key.clone());
          if key == "$in" && !inner.is_array() {
            return Err(path.join("."));
          }
          walk(inner, path)?;
          path.pop();
        }
        Ok(())
      }
      Value::Array(items) => {
        for (i, item) in items.iter().enumerate() {
          path.push(i.to_string());
          walk(item, path)?;
          path.pop();
        }
        Ok(())
      }
      _ => Ok(()),
    }
  }
  walk(value, &mut Vec::new())
}

async fn lookup(
  store: &dyn DocumentStore,
  step: &StepDef,
  scope: &ResolveScope<'_>,
) -> Result<Value, StepError> {
  let collection = require_collection(step)?;
  let local = step
    .local_field
    .as_ref()
    .ok_or_else(|| StepError::validation("localField", "lookup requires localField"))?;
  let foreign = step
    .foreign_field
    .as_deref()
    .filter(|f| !f.is_empty())
    .ok_or_else(|| StepError::validation("foreignField", "lookup requires foreignField"))?;

  let condition = match resolve_value(local, scope) {
    Some(Value::Array(values)) => json!({ "$in": values }),
    Some(value) => value,
    None => Value::Null,
  };

  let mut matcher = match &step.filter {
    Some(_) => match resolved_filter(step, scope) {
      Value::Object(map) => map,
      _ => {
        return Err(StepError::validation("filter", "filter must be an object"));
      }
    },
    None => Map::new(),
  };
  matcher.insert(foreign.to_string(), condition);

  let mut stages = vec![json!({ "$match": matcher })];
  if let Some(projection) = resolved_option(&step.projection, scope)
    && projection.as_object().is_some_and(|p| !p.is_empty())
  {
    stages.push(json!({ "$project": projection }));
  }

  let docs = store.aggregate(collection, &stages).await?;
  Ok(Value::Array(docs))
}

async fn count(
  store: &dyn DocumentStore,
  step: &StepDef,
  scope: &ResolveScope<'_>,
) -> Result<Value, StepError> {
  let collection = require_collection(step)?;
  let filter = resolved_filter(step, scope);
  let n = store.count_documents(collection, &filter).await?;
  Ok(Value::from(n))
}

async fn sum(
  store: &dyn DocumentStore,
  step: &StepDef,
  scope: &ResolveScope<'_>,
) -> Result<Value, StepError> {
  let collection = require_collection(step)?;
  let field = step
    .field
    .as_deref()
    .filter(|f| !f.is_empty())
    .ok_or_else(|| StepError::validation("field", "sum requires a field"))?;
  let filter = resolved_filter(step, scope);

  let stages = [
    json!({ "$match": filter }),
    json!({ "$group": { "_id": null, "total": { "$sum": format!("${}", field) } } }),
  ];
  let docs = store.aggregate(collection, &stages).await?;
  Ok(
    docs
      .into_iter()
      .next()
      .and_then(|d| d.get("total").cloned())
      .unwrap_or_else(|| Value::from(0)),
  )
}
