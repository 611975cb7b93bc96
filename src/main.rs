use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use correlate_config::{StepDef, TemplateDef};
use correlate_engine::{CorrelationEngine, EngineConfig, HealthMonitor};
use correlate_pipeline::PreviewOptions;
use correlate_store::SqliteStore;

/// Correlate - declarative multi-stage correlation over a document store
#[derive(Parser)]
#[command(name = "correlate")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.correlate)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Log level used when RUST_LOG is not set
  #[arg(long, global = true, default_value = "warn")]
  log_level: String,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Execute a template and print its result
  Run {
    /// Template id, pipeline statement or name
    template: String,

    /// Parameters as a JSON object (read from stdin when omitted)
    #[arg(long)]
    params: Option<String>,

    /// Print the versioned envelope instead of the legacy shape
    #[arg(long)]
    envelope: bool,

    /// Track the run as an execution instance
    #[arg(long)]
    track: bool,
  },

  /// Start a tracked run and print its instance id once it finishes
  Submit {
    template: String,

    #[arg(long)]
    params: Option<String>,
  },

  /// Execute a prefix of a pipeline file
  Preview {
    /// Path to a JSON file holding an array of steps
    steps_file: PathBuf,

    #[arg(long)]
    params: Option<String>,

    /// Last step to run (0-based)
    #[arg(long)]
    stage: Option<usize>,
  },

  /// Print each step's output key and dependencies
  Stages { steps_file: PathBuf },

  /// Statically check a template file
  Validate { template_file: PathBuf },

  /// Store a template file
  Import { template_file: PathBuf },

  /// Print one execution instance
  Instance { instance_id: String },

  /// List execution instances, newest first
  Instances,

  /// Fail instances whose heartbeat went stale
  Sweep,

  /// Run the health sweep until interrupted
  Monitor,
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing(&cli.log_level);

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".correlate"),
  };

  let Some(command) = cli.command else {
    println!("correlate - use --help to see available commands");
    return Ok(());
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async move {
    let engine = open_engine(&data_dir).await?;
    let outcome = dispatch(&engine, command).await;
    engine.shutdown().await;
    outcome
  })
}

fn init_tracing(fallback_level: &str) {
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(fallback_level))
    .unwrap_or_else(|_| EnvFilter::new("warn"));
  let _ = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .try_init();
}

/// Read `config.json` from the data directory, if present.
fn load_config(data_dir: &Path) -> Result<EngineConfig> {
  let path = data_dir.join("config.json");
  if !path.exists() {
    return Ok(EngineConfig::default());
  }
  let content = std::fs::read_to_string(&path)
    .with_context(|| format!("failed to read config file: {}", path.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse config file: {}", path.display()))
}

async fn open_engine(data_dir: &Path) -> Result<CorrelationEngine> {
  tokio::fs::create_dir_all(data_dir)
    .await
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
  let config = load_config(data_dir)?;

  let db_path = data_dir.join("correlate.db");
  let options = SqliteConnectOptions::new()
    .filename(&db_path)
    .create_if_missing(true);
  let pool = SqlitePoolOptions::new()
    .connect_with(options)
    .await
    .with_context(|| format!("failed to open database: {}", db_path.display()))?;
  let store = SqliteStore::new(pool);
  store.migrate().await.context("failed to run migrations")?;

  info!(data_dir = %data_dir.display(), "engine_opened");
  Ok(CorrelationEngine::new(Arc::new(store), config))
}

async fn dispatch(engine: &CorrelationEngine, command: Commands) -> Result<()> {
  match command {
    Commands::Run {
      template,
      params,
      envelope,
      track,
    } => {
      let params = read_params(params)?;
      if track {
        let run = engine.execute_tracked(&template, params).await?;
        eprintln!("Instance: {}", run.instance_id);
        print_json(&run.outcome.context("template execution failed")?)
      } else {
        let output = engine
          .execute_template(&template, params)
          .await
          .context("template execution failed")?;
        if envelope {
          print_json(&output.to_envelope())
        } else {
          print_json(&output.to_legacy_json())
        }
      }
    }
    Commands::Submit { template, params } => {
      let params = read_params(params)?;
      let instance_id = engine.submit(&template, params).await?;
      eprintln!("Submitted instance: {}", instance_id);
      loop {
        let status = engine.get_instance_status(&instance_id).await?;
        if status.instance.status.is_terminal() {
          return print_json(&serde_json::to_value(&status)?);
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
      }
    }
    Commands::Preview {
      steps_file,
      params,
      stage,
    } => {
      let steps = read_steps(&steps_file).await?;
      let params = read_params(params)?;
      let options = PreviewOptions {
        execute_all: stage.is_none(),
        stage_index: stage,
      };
      let result = engine
        .preview_pipeline(&steps, &params, options)
        .await
        .context("preview failed")?;
      print_json(&serde_json::to_value(&result)?)
    }
    Commands::Stages { steps_file } => {
      let steps = read_steps(&steps_file).await?;
      print_json(&serde_json::to_value(engine.get_stage_info(&steps))?)
    }
    Commands::Validate { template_file } => {
      let template = read_template(&template_file).await?;
      let report = engine.validate_template(
        &template.internal_schema,
        template.logic_source(),
        template.input_schema.as_ref(),
      );
      print_json(&serde_json::to_value(&report)?)?;
      if !report.is_valid {
        bail!("template is invalid");
      }
      Ok(())
    }
    Commands::Import { template_file } => {
      let template = read_template(&template_file).await?;
      let report = engine.validate_template(
        &template.internal_schema,
        template.logic_source(),
        template.input_schema.as_ref(),
      );
      if !report.is_valid {
        bail!("template is invalid: {}", report.errors.join("; "));
      }
      for warning in &report.warnings {
        eprintln!("warning: {}", warning);
      }
      let id = engine.save_template(&template).await?;
      eprintln!("Imported template: {}", template.name);
      println!("{}", id);
      Ok(())
    }
    Commands::Instance { instance_id } => {
      let status = engine.get_instance_status(&instance_id).await?;
      print_json(&serde_json::to_value(&status)?)
    }
    Commands::Instances => {
      let summaries = engine.list_instance_summaries().await?;
      print_json(&serde_json::to_value(&summaries)?)
    }
    Commands::Sweep => {
      let report = engine.run_heartbeat_health_sweep().await?;
      print_json(&serde_json::to_value(report)?)
    }
    Commands::Monitor => {
      let cancel = CancellationToken::new();
      let monitor = HealthMonitor::new(engine.clone());
      let handle = tokio::spawn(monitor.start(cancel.clone()));
      tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
      cancel.cancel();
      let reaped = handle.await.context("health monitor task failed")?;
      eprintln!("Reaped {} stale instance(s)", reaped);
      Ok(())
    }
  }
}

fn print_json(value: &Value) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

async fn read_steps(path: &Path) -> Result<Vec<StepDef>> {
  let content = tokio::fs::read_to_string(path)
    .await
    .with_context(|| format!("failed to read steps file: {}", path.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse steps file: {}", path.display()))
}

async fn read_template(path: &Path) -> Result<TemplateDef> {
  let content = tokio::fs::read_to_string(path)
    .await
    .with_context(|| format!("failed to read template file: {}", path.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse template file: {}", path.display()))
}

/// Parameters from `--params`, else from stdin when it is piped.
fn read_params(arg: Option<String>) -> Result<Map<String, Value>> {
  use std::io::IsTerminal;

  let input = match arg {
    Some(arg) => arg,
    None if io::stdin().is_terminal() => return Ok(Map::new()),
    None => {
      let mut input = String::new();
      io::stdin()
        .read_to_string(&mut input)
        .context("failed to read params from stdin")?;
      input
    }
  };
  parse_params(&input)
}

fn parse_params(input: &str) -> Result<Map<String, Value>> {
  if input.trim().is_empty() {
    return Ok(Map::new());
  }
  match serde_json::from_str(input).context("failed to parse params JSON")? {
    Value::Object(map) => Ok(map),
    Value::Null => Ok(Map::new()),
    other => bail!("params must be a JSON object, got {}", other),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_params() {
    assert_eq!(parse_params("").unwrap(), Map::new());
    assert_eq!(parse_params("null").unwrap(), Map::new());
    assert_eq!(
      parse_params(r#"{"entityName":"PUMP1"}"#).unwrap()["entityName"],
      json!("PUMP1")
    );
    assert!(parse_params("[1]").is_err());
    assert!(parse_params("{").is_err());
  }

  #[test]
  fn test_load_config() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(load_config(dir.path()).unwrap(), EngineConfig::default());

    std::fs::write(
      dir.path().join("config.json"),
      r#"{ "staleAfterMs": 5000, "positionalParams": false }"#,
    )
    .unwrap();
    let config = load_config(dir.path()).unwrap();
    assert_eq!(config.stale_after_ms, 5000);
    assert!(!config.positional_params);
    assert_eq!(config.heartbeat_interval_ms, 10_000);
  }

  #[tokio::test]
  async fn test_engine_round_trip_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path()).await.unwrap();
    let template: TemplateDef = serde_json::from_value(json!({
      "name": "empty count",
      "internalSchema": {
        "pipelineSteps": [{ "function": "count", "collection": "Things", "output": "n" }]
      }
    }))
    .unwrap();
    engine.save_template(&template).await.unwrap();

    let output = engine.execute_template("empty count", Map::new()).await.unwrap();
    assert_eq!(output.to_legacy_json()["ctx"]["n"], json!(0));
    assert!(dir.path().join("correlate.db").exists());
  }
}
