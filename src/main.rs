use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;

use ferry_cluster::ConfiguredBackendFactory;
use ferry_config::FerryConfig;
use ferry_runner::{ExecutionBackend, RoutingBackend, RunPhase, RunSpec, RunState, Secret, Trigger};
use ferry_workflow::{WorkflowId, WorkflowInstance};

/// Ferry - run workflow containers on interchangeable cluster backends
#[derive(Parser)]
#[command(name = "ferry")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the config file (default: ~/.ferry/config.json)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Encode or decode workflow keys
  Key {
    #[command(subcommand)]
    action: KeyAction,
  },

  /// Start one execution of a workflow instance, observe it, and clean up
  Run {
    /// Workflow key, e.g. team-a#daily-etl
    workflow: String,

    /// Partition or trigger marker of the instance
    #[arg(long)]
    parameter: String,

    /// Container image to run
    #[arg(long)]
    image: String,

    /// Execution id (default: random)
    #[arg(long)]
    execution_id: Option<String>,

    /// Service account the execution runs as
    #[arg(long)]
    service_account: Option<String>,

    /// Existing secret to mount, as NAME:/MOUNT/PATH
    #[arg(long)]
    secret: Option<String>,

    /// Environment variable, as KEY=VALUE (repeatable)
    #[arg(long = "env")]
    env: Vec<String>,

    /// Capture the container's termination log
    #[arg(long)]
    termination_logging: bool,

    /// Route to this backend instead of the configured active one
    #[arg(long)]
    backend: Option<String>,

    /// Container arguments
    #[arg(last = true)]
    args: Vec<String>,
  },

  /// Reclaim backend resources that no live execution uses
  Sweep {
    /// Sweep this backend instead of the configured active one
    #[arg(long)]
    backend: Option<String>,
  },
}

#[derive(Subcommand)]
enum KeyAction {
  /// Print the key for an owner and name
  Encode { owner: String, name: String },

  /// Split a key into owner and name
  Parse { key: String },
}

struct RunArgs {
  workflow: String,
  parameter: String,
  image: String,
  execution_id: Option<String>,
  service_account: Option<String>,
  secret: Option<String>,
  env: Vec<String>,
  termination_logging: bool,
  backend: Option<String>,
  args: Vec<String>,
}

fn main() -> Result<()> {
  init_tracing();
  let cli = Cli::parse();

  match cli.command {
    Some(Commands::Key { action }) => match action {
      KeyAction::Encode { owner, name } => {
        let id = WorkflowId::new(owner, name).context("invalid workflow identity")?;
        println!("{}", id.key());
      }
      KeyAction::Parse { key } => {
        let id = WorkflowId::parse_key(&key).context("invalid workflow key")?;
        println!("{}", serde_json::to_string_pretty(&id)?);
      }
    },
    Some(Commands::Run {
      workflow,
      parameter,
      image,
      execution_id,
      service_account,
      secret,
      env,
      termination_logging,
      backend,
      args,
    }) => {
      let config = load_config(cli.config)?;
      let run = RunArgs {
        workflow,
        parameter,
        image,
        execution_id,
        service_account,
        secret,
        env,
        termination_logging,
        backend,
        args,
      };
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(async { run_async(config, run).await })?;
    }
    Some(Commands::Sweep { backend }) => {
      let config = load_config(cli.config)?;
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(async { sweep_async(config, backend).await })?;
    }
    None => {
      println!("ferry - use --help to see available commands");
    }
  }

  Ok(())
}

fn init_tracing() {
  let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
  let _ = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .try_init();
}

fn load_config(path: Option<PathBuf>) -> Result<FerryConfig> {
  let path = match path {
    Some(path) => path,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".ferry")
      .join("config.json"),
  };
  FerryConfig::load(&path)
    .with_context(|| format!("failed to load config: {}", path.display()))
}

/// Build a router over the configured backends, optionally pinned to `backend`.
fn build_router(config: &FerryConfig, backend: Option<String>) -> Result<RoutingBackend> {
  let active = config.active();
  if let Some(backend) = backend {
    config
      .backend(&backend)
      .with_context(|| format!("cannot route to backend '{}'", backend))?;
    active.set(backend);
  }

  let factory = Arc::new(ConfiguredBackendFactory::new(config.clone()));
  Ok(RoutingBackend::new(factory, active.resolver()))
}

fn build_run_spec(run: &RunArgs) -> Result<RunSpec> {
  let execution_id = run
    .execution_id
    .clone()
    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

  let mut builder = RunSpec::builder(execution_id, &run.image)
    .args(run.args.iter().cloned())
    .termination_logging(run.termination_logging)
    .trigger(Trigger::Adhoc("cli".to_string()));

  if let Some(account) = &run.service_account {
    builder = builder.service_account(account);
  }

  if let Some(secret) = &run.secret {
    let (name, mount_path) = secret
      .split_once(':')
      .with_context(|| format!("secret '{}' must be NAME:/MOUNT/PATH", secret))?;
    builder = builder.secret(Secret::new(name, mount_path));
  }

  for var in &run.env {
    let Some((key, value)) = var.split_once('=') else {
      bail!("env var '{}' must be KEY=VALUE", var);
    };
    builder = builder.env(key, value);
  }

  builder.build().context("invalid run spec")
}

async fn run_async(config: FerryConfig, run: RunArgs) -> Result<()> {
  let workflow_id = WorkflowId::parse_key(&run.workflow)
    .with_context(|| format!("invalid workflow key: {}", run.workflow))?;
  let instance = WorkflowInstance::new(workflow_id, run.parameter.clone());
  let run_spec = build_run_spec(&run)?;
  let router = build_router(&config, run.backend.clone())?;

  let result = execute(&router, &instance, run_spec).await;

  // Close even when the run failed, without masking its error.
  let closed = router.close().await;
  let output = result?;
  closed.context("failed to close backends")?;

  println!("{}", serde_json::to_string_pretty(&output)?);
  Ok(())
}

async fn execute(
  router: &RoutingBackend,
  instance: &WorkflowInstance,
  run_spec: RunSpec,
) -> Result<serde_json::Value> {
  let execution_id = run_spec.execution_id().to_string();

  match router.start(instance, run_spec).await {
    Ok(()) => eprintln!("Started execution: {}", execution_id),
    Err(e) if e.is_already_running() => eprintln!("Execution already running: {}", execution_id),
    Err(e) => return Err(e).context("failed to start execution"),
  }

  let state =
    RunState::new(instance.clone(), RunPhase::Submitted).with_execution_id(&execution_id);
  let status = router
    .poll(&state)
    .await
    .context("failed to poll execution")?;

  router
    .cleanup_execution(instance, &execution_id)
    .await
    .context("failed to clean up execution")?;
  router.cleanup().await.context("sweep failed")?;

  Ok(json!({
    "workflow": instance.workflow_id,
    "instance": instance.to_string(),
    "execution_id": execution_id,
    "observed": status,
  }))
}

async fn sweep_async(config: FerryConfig, backend: Option<String>) -> Result<()> {
  let router = build_router(&config, backend)?;

  let result = router.cleanup().await;
  let closed = router.close().await;
  result.context("sweep failed")?;
  closed.context("failed to close backends")?;

  eprintln!("Sweep completed");
  Ok(())
}
