use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use config_loader::{ConfigManager, ProxyConfig};
use container_proxy::{
    ArgumentList, CommandRunner, DirectRunner, ProxyError, ProxyingRunner, RuntimeSettings,
    TeardownOutcome,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

mod steps;

use steps::{parse_env_pair, resolve_workspace, ImageSource, StepFile, StepPlan};

const INTERRUPTED_EXIT: i32 = 130;

#[derive(Parser)]
#[command(name = "buildboxctl", version)]
struct Cli {
    /// Proxy configuration file (defaults to $BUILDBOX_CONFIG or .buildbox/config.json)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one command inside a fresh build container
    #[command(group(ArgGroup::new("source").required(true).args(["image", "dockerfile"])))]
    Run {
        /// Image to run in, pulled when missing
        #[arg(long)]
        image: Option<String>,
        /// Directory holding the Dockerfile to build the image from
        #[arg(long, value_name = "DIR")]
        dockerfile: Option<PathBuf>,
        /// Workspace bind-mounted into the container (defaults to the current directory)
        #[arg(long, value_name = "DIR")]
        workspace: Option<PathBuf>,
        /// Environment injected into the container
        #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,
        /// Zero-based index of a command argument to hide from logs
        #[arg(long = "mask", value_name = "INDEX")]
        mask: Vec<usize>,
        #[arg(last = true, required = true, value_name = "COMMAND")]
        command: Vec<String>,
    },
    /// Run every step of a YAML step file inside one build container
    Steps {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Print version and exit
    Version,
}

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<ProxyConfig> {
    let manager = match path {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new(),
    };
    manager
        .load()
        .with_context(|| format!("Failed to load config from {}", manager.config_path().display()))
}

fn runtime_settings(config: ProxyConfig) -> RuntimeSettings {
    RuntimeSettings {
        engine: config.engine,
        exec_tty: config.exec_tty,
        placeholder: config.placeholder,
        tmp_dir: config.tmp_dir,
        labels: config.labels,
    }
}

fn run_plan(
    image: Option<String>,
    dockerfile: Option<PathBuf>,
    workspace: Option<PathBuf>,
    env: Vec<(String, String)>,
    mask: Vec<usize>,
    command: Vec<String>,
) -> Result<StepPlan> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let source = match (image, dockerfile) {
        (Some(image), _) => ImageSource::Named(image),
        (None, Some(dir)) => ImageSource::Dockerfile(dir),
        (None, None) => anyhow::bail!("either --image or --dockerfile is required"),
    };

    let mut masks = vec![false; command.len()];
    for idx in mask {
        let slot = masks
            .get_mut(idx)
            .with_context(|| format!("--mask {} is out of range", idx))?;
        *slot = true;
    }

    let mut plan = StepPlan {
        name: "run".to_string(),
        source,
        workspace: resolve_workspace(&cwd, workspace.as_deref())?,
        env: env.into_iter().collect(),
        commands: Vec::new(),
    };
    let cmd = plan.command(ArgumentList::with_masks(command, &masks));
    plan.commands.push(cmd);
    Ok(plan)
}

fn steps_plan(file: &Path) -> Result<StepPlan> {
    let base_dir = match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().context("Failed to read current directory")?,
    };
    let default_name = file
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "steps".to_string());
    StepFile::load(file)?.into_plan(&base_dir, &default_name)
}

/// Runs the commands in order, stopping at the first non-zero status.
fn run_steps(runner: &ProxyingRunner, plan: &StepPlan) -> Result<i32, ProxyError> {
    for (idx, command) in plan.commands.iter().enumerate() {
        info!(build = %plan.name, step = idx + 1, command = %command.args, "step.start");
        let outcome = runner.launch(command)?;
        info!(build = %plan.name, step = idx + 1, status = outcome.status, "step.end");
        if !outcome.success() {
            return Ok(outcome.status);
        }
    }
    Ok(0)
}

fn log_teardown(outcome: &TeardownOutcome) {
    match outcome {
        TeardownOutcome::Removed {
            container,
            stopped,
            removed,
        } => info!(container = %container, stopped, removed, "build container torn down"),
        TeardownOutcome::SweptOrphans(ids) => {
            info!(count = ids.len(), "orphaned build containers removed")
        }
        TeardownOutcome::NoContainer | TeardownOutcome::AlreadyTornDown => {}
    }
}

async fn execute(plan: StepPlan, config: ProxyConfig) -> Result<i32> {
    let runner = Arc::new(ProxyingRunner::new(
        Arc::new(DirectRunner::new()),
        runtime_settings(config),
        plan.source.selector(),
        plan.build_context(),
    ));

    let worker = {
        let runner = runner.clone();
        tokio::task::spawn_blocking(move || run_steps(&runner, &plan))
    };

    let teardown = |runner: Arc<ProxyingRunner>| tokio::task::spawn_blocking(move || runner.teardown());

    tokio::select! {
        joined = worker => {
            let outcome = teardown(runner.clone()).await.context("teardown task failed")?;
            log_teardown(&outcome);
            match joined.context("step worker panicked")? {
                Ok(status) => Ok(status),
                Err(err) => {
                    error!(stage = err.stage(), code = err.code(), "build step failed");
                    if let Some(stderr) = err.engine_stderr() {
                        eprintln!("{}", stderr.trim_end());
                    }
                    Err(err.into())
                }
            }
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for interrupt")?;
            warn!("interrupted; tearing down build container");
            let outcome = teardown(runner.clone()).await.context("teardown task failed")?;
            log_teardown(&outcome);
            Ok(INTERRUPTED_EXIT)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let plan = match cli.cmd {
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Commands::Run {
            image,
            dockerfile,
            workspace,
            env,
            mask,
            command,
        } => run_plan(image, dockerfile, workspace, env, mask, command)?,
        Commands::Steps { file } => steps_plan(&file)?,
    };

    let config = load_config(cli.config.as_deref())?;
    let status = execute(plan, config).await?;
    std::process::exit(status);
}
