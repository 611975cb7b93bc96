use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use mlua::{
  ChunkMode, Function, HookTriggers, Lua, LuaOptions, LuaSerdeExt, SerializeOptions, StdLib, Thread,
  Value as LuaValue, Variadic, VmState,
};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::error::LogicError;
use crate::limits::LogicLimits;

const LOG_TARGET: &str = "correlate::logic";
const HOOK_EVERY: u32 = 1_000;

/// Resolves other templates on behalf of `resolve(...)` in a script.
#[async_trait]
pub trait TemplateCallback: Send + Sync {
  /// Execute the template named by `identifier`. `depth` is the nesting
  /// level the nested template's own logic will run at.
  async fn resolve_template(
    &self,
    identifier: &str,
    params: Map<String, Value>,
    depth: usize,
  ) -> Result<Value, LogicError>;
}

/// Executes logic scripts under [`LogicLimits`].
#[derive(Debug, Clone, Default)]
pub struct LogicExecutor {
  limits: LogicLimits,
}

fn serialize_options() -> SerializeOptions {
  SerializeOptions::new()
    .serialize_none_to_null(false)
    .serialize_unit_to_null(false)
}

impl LogicExecutor {
  pub fn new(limits: LogicLimits) -> Self {
    Self { limits }
  }

  /// Run `source` with `results` and `params` in scope.
  ///
  /// `depth` is 0 for a top-level template and grows by one for every
  /// nested `resolve` into another template.
  pub async fn execute(
    &self,
    source: &str,
    results: &Map<String, Value>,
    params: &Map<String, Value>,
    callback: Option<Arc<dyn TemplateCallback>>,
    depth: usize,
  ) -> Result<Value, LogicError> {
    if depth > self.limits.max_depth {
      return Err(LogicError::DepthExceeded(depth));
    }

    let lua = self.sandbox().map_err(|e| LogicError::execution(e.to_string()))?;
    install_scope(&lua, results, params, callback, depth)
      .map_err(|e| LogicError::execution(e.to_string()))?;

    let thread = compile(&lua, source)
      .and_then(|function| lua.create_thread(function))
      .map_err(|e| self.classify(e, false))?;
    let timed_out = Arc::new(AtomicBool::new(false));
    self.install_deadline(&thread, timed_out.clone());

    let outcome = tokio::time::timeout(self.limits.timeout(), evaluate(&lua, thread)).await;
    match outcome {
      Err(_) => Err(LogicError::Timeout(self.limits.timeout())),
      Ok(Ok(value)) => Ok(value),
      Ok(Err(e)) => Err(self.classify(e, timed_out.load(Ordering::Relaxed))),
    }
  }

  fn sandbox(&self) -> mlua::Result<Lua> {
    let lua = Lua::new_with(
      StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8,
      LuaOptions::new(),
    )?;
    lua.set_memory_limit(self.limits.memory_limit_bytes)?;

    let globals = lua.globals();
    for name in ["dofile", "loadfile", "load", "loadstring", "collectgarbage"] {
      globals.set(name, LuaValue::Nil)?;
    }
    Ok(lua)
  }

  /// The hook lives on the thread the script runs in; a tight loop never
  /// yields back to the async timeout.
  fn install_deadline(&self, thread: &Thread, timed_out: Arc<AtomicBool>) {
    let deadline = Instant::now() + self.limits.timeout();
    thread.set_hook(
      HookTriggers::new().every_nth_instruction(HOOK_EVERY),
      move |_lua, _debug| {
        if Instant::now() >= deadline {
          timed_out.store(true, Ordering::Relaxed);
          Err(mlua::Error::runtime("logic exceeded its time limit"))
        } else {
          Ok(VmState::Continue)
        }
      },
    );
  }

  fn classify(&self, err: mlua::Error, timed_out: bool) -> LogicError {
    if timed_out {
      return LogicError::Timeout(self.limits.timeout());
    }
    match err {
      mlua::Error::MemoryError(_) => LogicError::MemoryLimit(self.limits.memory_limit_bytes),
      mlua::Error::SyntaxError { message, .. } => LogicError::Syntax { message },
      mlua::Error::CallbackError { cause, .. } => match cause.as_ref() {
        mlua::Error::MemoryError(_) => LogicError::MemoryLimit(self.limits.memory_limit_bytes),
        _ => LogicError::execution(cause.to_string()),
      },
      other => LogicError::execution(other.to_string()),
    }
  }
}

/// Compile `source` as an expression, falling back to a statement block.
fn compile(lua: &Lua, source: &str) -> mlua::Result<Function> {
  let as_expression = format!("return {}", source);
  let expression = lua
    .load(as_expression.as_str())
    .set_name("logic")
    .set_mode(ChunkMode::Text)
    .into_function();
  match expression {
    Ok(function) => Ok(function),
    Err(_) => lua
      .load(source)
      .set_name("logic")
      .set_mode(ChunkMode::Text)
      .into_function(),
  }
}

async fn evaluate(lua: &Lua, thread: Thread) -> mlua::Result<Value> {
  let returned: LuaValue = thread.into_async(()).await?;
  let value = match returned {
    LuaValue::Nil => lua.globals().get::<LuaValue>("result")?,
    other => other,
  };
  match value {
    LuaValue::Nil => Ok(Value::Null),
    other => lua.from_value(other),
  }
}

fn install_scope(
  lua: &Lua,
  results: &Map<String, Value>,
  params: &Map<String, Value>,
  callback: Option<Arc<dyn TemplateCallback>>,
  depth: usize,
) -> mlua::Result<()> {
  let globals = lua.globals();
  globals.set("results", lua.to_value_with(results, serialize_options())?)?;
  globals.set("params", lua.to_value_with(params, serialize_options())?)?;

  globals.set(
    "now_ms",
    lua.create_function(|_, ()| Ok(Utc::now().timestamp_millis()))?,
  )?;
  globals.set(
    "now_iso",
    lua.create_function(|_, ()| Ok(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)))?,
  )?;

  let log = lua.create_table()?;
  log.set(
    "debug",
    lua.create_function(|_, msg: String| {
      debug!(target: LOG_TARGET, "{}", msg);
      Ok(())
    })?,
  )?;
  log.set(
    "info",
    lua.create_function(|_, msg: String| {
      info!(target: LOG_TARGET, "{}", msg);
      Ok(())
    })?,
  )?;
  log.set(
    "warn",
    lua.create_function(|_, msg: String| {
      warn!(target: LOG_TARGET, "{}", msg);
      Ok(())
    })?,
  )?;
  log.set(
    "error",
    lua.create_function(|_, msg: String| {
      error!(target: LOG_TARGET, "{}", msg);
      Ok(())
    })?,
  )?;
  globals.set("log", log)?;
  globals.set(
    "print",
    lua.create_function(|_, parts: Variadic<String>| {
      info!(target: LOG_TARGET, "{}", parts.join("\t"));
      Ok(())
    })?,
  )?;

  let local = Arc::new(results.clone());
  globals.set(
    "resolve",
    lua.create_async_function(move |lua, (identifier, args): (String, Option<LuaValue>)| {
      let local = local.clone();
      let callback = callback.clone();
      async move {
        if let Some(value) = local.get(&identifier) {
          return lua.to_value_with(value, serialize_options());
        }

        let params = match args {
          None | Some(LuaValue::Nil) => Map::new(),
          Some(value) => match lua.from_value::<Value>(value)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            Value::Array(items) if items.is_empty() => Map::new(),
            _ => {
              return Err(mlua::Error::runtime(
                "resolve params must be a table of named values",
              ));
            }
          },
        };

        let Some(callback) = callback else {
          return Err(mlua::Error::runtime(format!(
            "resolve('{}'): no such result and template resolution is unavailable",
            identifier
          )));
        };

        let value = callback
          .resolve_template(&identifier, params, depth + 1)
          .await
          .map_err(mlua::Error::external)?;
        lua.to_value_with(&value, serialize_options())
      }
    })?,
  )?;

  // Names the sandbox already defines stay reachable; the value is still
  // in `results` or `params`. A param overrides a result of the same name.
  let mut bound: HashSet<&str> = HashSet::new();
  for (key, value) in results.iter().chain(params.iter()) {
    if !bound.contains(key.as_str()) && !globals.get::<LuaValue>(key.as_str())?.is_nil() {
      debug!(target: LOG_TARGET, name = %key, "global name is reserved, not shadowing it");
      continue;
    }
    globals.set(key.as_str(), lua.to_value_with(value, serialize_options())?)?;
    bound.insert(key.as_str());
  }

  Ok(())
}

/// Compile `source` without running it.
///
/// Accepts both statement blocks and bare expressions, matching how
/// [`LogicExecutor::execute`] evaluates a script.
pub fn check_syntax(source: &str) -> Result<(), LogicError> {
  let lua = Lua::new_with(StdLib::NONE, LuaOptions::new())
    .map_err(|e| LogicError::execution(e.to_string()))?;

  match compile(&lua, source) {
    Ok(_) => Ok(()),
    Err(mlua::Error::SyntaxError { message, .. }) => Err(LogicError::Syntax { message }),
    Err(other) => Err(LogicError::Syntax {
      message: other.to_string(),
    }),
  }
}
