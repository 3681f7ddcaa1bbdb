//! Dockside - run a deployed ECS workload locally
//!
//! ## Usage
//!
//! ```bash
//! # Run the api service of shop/test with a debug log level
//! dockside run-local --app shop --env test --name api \
//!     --env-var-override api:LOG_LEVEL=debug
//!
//! # Build the web container from source, rebuild on change, publish 8080 -> 80
//! dockside run-local --app shop --env test --name web \
//!     --build web=./web --watch --port-override 8080:80
//!
//! # Reach the environment's databases and sibling services
//! dockside run-local --app shop --env test --name api --proxy
//! ```
//!
//! Ctrl-C stops the run; all local containers are removed before exit.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use dialoguer::{theme::ColorfulTheme, Input};
use dockside_core::WorkloadName;
use dockside_orchestrator::{
    aws::{self, AwsClients},
    config::{parse_build_context, parse_env_override, parse_port_override, RunConfig},
    hosts::{DEFAULT_APP_TAG_KEY, DEFAULT_ENV_TAG_KEY, DEFAULT_SERVICE_TAG_KEY},
    Collaborators, DockerConfig, DockerImageBuilder, DockerOrchestrator, EcsExecExecutor, Supervisor,
    TagKeys, Watch, WorkloadPreparer,
};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Dockside: run deployed workloads on your machine
#[derive(Parser)]
#[command(name = "dockside")]
#[command(about = "Run a deployed ECS workload locally", long_about = None)]
struct Cli {
    /// AWS region (default: from the AWS config chain)
    #[arg(long, global = true, env = "DOCKSIDE_REGION")]
    region: Option<String>,

    /// Also write logs to a daily rotated file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workload locally in Docker
    RunLocal(RunLocalArgs),
}

#[derive(Args)]
struct RunLocalArgs {
    /// Application name
    #[arg(long, env = "DOCKSIDE_APP")]
    app: Option<String>,

    /// Environment name
    #[arg(long, env = "DOCKSIDE_ENV")]
    env: Option<String>,

    /// Workload (service) name
    #[arg(long)]
    name: Option<String>,

    /// Override an environment variable, for all containers or one
    #[arg(long = "env-var-override", value_name = "[CONTAINER:]KEY=VALUE")]
    env_var_overrides: Vec<String>,

    /// Publish a container port on a different host port
    #[arg(long = "port-override", value_name = "HOST:CONTAINER")]
    port_overrides: Vec<String>,

    /// Build a container's image locally from a docker context
    #[arg(long = "build", value_name = "CONTAINER=PATH")]
    builds: Vec<String>,

    /// Rebuild and restart when files change
    #[arg(long)]
    watch: bool,

    /// Directory to watch
    #[arg(long, default_value = ".")]
    watch_dir: PathBuf,

    /// Forward traffic to the environment's services and databases
    #[arg(long)]
    proxy: bool,

    /// Run with the task role's credentials instead of your own
    #[arg(long)]
    use_task_role: bool,

    /// Role used to open port-forwarding sessions (default: <app>-<env>-EnvManagerRole)
    #[arg(long)]
    env_manager_role: Option<String>,

    /// Quiet period after the last change before rebuilding (milliseconds)
    #[arg(long, default_value_t = 500)]
    debounce_ms: u64,

    /// Image of the shared network container
    #[arg(long, env = "DOCKSIDE_PAUSE_IMAGE")]
    pause_image: Option<String>,

    /// Seconds to wait for a container dependency condition
    #[arg(long, default_value_t = 300)]
    dependency_timeout: u64,

    /// Docker engine address (default: local socket)
    #[arg(long, env = "DOCKER_HOST")]
    docker_host: Option<String>,

    /// Tag key holding the application name
    #[arg(long, default_value = DEFAULT_APP_TAG_KEY)]
    app_tag_key: String,

    /// Tag key holding the environment name
    #[arg(long, default_value = DEFAULT_ENV_TAG_KEY)]
    env_tag_key: String,

    /// Tag key holding the service name
    #[arg(long, default_value = DEFAULT_SERVICE_TAG_KEY)]
    service_tag_key: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; the guard flushes the file writer on exit
    let (file_layer, _guard) = match &cli.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "dockside.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dockside=info,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    match cli.command {
        Commands::RunLocal(args) => run_local(cli.region, args).await,
    }
}

/// Use the flag value, prompt for it on a terminal, or fail
fn required(value: Option<String>, flag: &str, prompt: &str) -> anyhow::Result<String> {
    if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
        return Ok(value);
    }
    if !std::io::stdin().is_terminal() {
        bail!("--{flag} required");
    }
    let value: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .interact_text()?;
    Ok(value)
}

fn run_config(region: Option<String>, args: RunLocalArgs) -> anyhow::Result<RunConfig> {
    let workload = WorkloadName::new(
        required(args.app, "app", "Application name")?,
        required(args.env, "env", "Environment name")?,
        required(args.name, "name", "Workload name")?,
    );

    let mut config = RunConfig::new(workload)
        .with_proxy(args.proxy)
        .with_task_role(args.use_task_role)
        .with_debounce(Duration::from_millis(args.debounce_ms))
        .with_dependency_timeout(Duration::from_secs(args.dependency_timeout))
        .with_tag_keys(TagKeys {
            application: args.app_tag_key,
            environment: args.env_tag_key,
            service: args.service_tag_key,
        });

    for raw in &args.env_var_overrides {
        let (key, value) = parse_env_override(raw)?;
        config = config.with_env_override(key, value);
    }
    for raw in &args.port_overrides {
        config = config.with_port_override(parse_port_override(raw)?);
    }
    for raw in &args.builds {
        let (container, context) = parse_build_context(raw)?;
        config = config.with_build_context(container, context);
    }
    if args.watch {
        config = config.with_watch_dir(args.watch_dir);
    }
    if let Some(role) = args.env_manager_role {
        config = config.with_env_manager_role(role);
    }
    if let Some(image) = args.pause_image {
        config = config.with_pause_image(image);
    }
    if let Some(host) = args.docker_host {
        config = config.with_docker_host(host);
    }
    if let Some(region) = region {
        config = config.with_region(region);
    }

    config.validate()?;
    Ok(config)
}

async fn run_local(region: Option<String>, args: RunLocalArgs) -> anyhow::Result<()> {
    let mut config = run_config(region, args)?;
    info!(workload = %config.workload, proxy = config.proxy, "🐳 Starting local run");

    let sdk = aws::load_config(config.region.clone()).await;
    let clients = AwsClients::new(&sdk, config.tag_keys.clone());
    if config.region.is_none() {
        if let Some(region) = clients.region.clone() {
            config = config.with_region(region);
        }
    }

    let mut exec = EcsExecExecutor::new();
    let mut docker = DockerConfig::new(config.container_prefix())
        .with_pause_image(config.pause_image.clone())
        .with_dependency_timeout(config.dependency_timeout);
    if let Some(region) = &config.region {
        exec = exec.with_region(region.clone());
        docker = docker.with_region(region.clone());
    }
    if let Some(host) = &config.docker_host {
        docker = docker.with_docker_host(host.clone());
    }

    let ecs = Arc::new(clients.ecs);
    let remote = Collaborators {
        task_definitions: ecs.clone(),
        services: ecs.clone(),
        service_connect: ecs,
        secrets_manager: Arc::new(clients.secrets_manager),
        parameter_store: Arc::new(clients.parameter_store),
        caller: Arc::new(clients.caller),
        sts: Arc::new(clients.sts),
        tagging: Arc::new(clients.tagging),
        rds: Arc::new(clients.rds),
        exec: Arc::new(exec),
        images: Arc::new(DockerImageBuilder::new(config.build_contexts.clone())),
    };

    let orchestrator = DockerOrchestrator::new(docker).context("connect to docker")?;
    let debounce = config.debounce;
    let watch_dir = config.watch_dir.clone();
    let mut supervisor =
        Supervisor::new(orchestrator, WorkloadPreparer::new(config, remote)).with_debounce(debounce);
    if let Some(dir) = watch_dir {
        supervisor = supervisor.with_watch(Watch::spawn(dir)?);
    }

    let (interrupt_tx, interrupt_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupt_tx.send(()).await.is_err() {
                break;
            }
        }
    });

    let summary = supervisor.run(interrupt_rx).await?;
    if !summary.teardown_errors.is_empty() {
        for err in &summary.teardown_errors {
            warn!(error = %err, "⚠️  Teardown error");
        }
        bail!("teardown finished with {} error(s)", summary.teardown_errors.len());
    }
    info!(rebuilds = summary.rebuilds, "👋 Local run stopped, containers removed");
    Ok(())
}
