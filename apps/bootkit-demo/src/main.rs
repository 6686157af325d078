//! Demo host for the bootkit runtime.
//!
//! Wires one provider and two modules from the `modules.<name>.config` sections of the
//! configuration, then runs them either in-process (`run`) or in a supervised pool of
//! re-executed worker processes (`cluster`).

use anyhow::{Context, Result};
use bootkit::runtime::wait_for_shutdown;
use bootkit::{
    AppConfig, Class, ClusterEvent, ClusterOptions, ClusteredCore, Dependencies, Dependency,
    InitCtx, Injectable, Module, Mountable, Runtime, RuntimeOptions, async_trait,
};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// bootkit demo - module runtime with an optional supervised worker pool
#[derive(Parser)]
#[command(name = "bootkit-demo")]
#[command(about = "bootkit demo - module runtime with an optional supervised worker pool")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all modules in this process
    Run,
    /// Run modules in a pool of supervised worker processes
    Cluster {
        /// Number of workers (overrides `cluster.cpus`)
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Validate configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_verbosity(cli.verbose);
    bootkit::logging::init_logging(&config.logging);

    if cli.print_config {
        println!("Effective configuration:\n{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&config).await,
        Commands::Cluster { workers } => run_cluster(&config, workers).await,
        Commands::Check => check_config(&config),
    }
}

fn check_config(config: &AppConfig) -> Result<()> {
    tracing::info!("Checking configuration...");
    config.module_config::<GreeterOptions>("greeter")?;
    config
        .module_config::<HeartbeatOptions>("heartbeat")?
        .interval()?;
    println!("Configuration is valid");
    println!("{}", config.to_yaml()?);
    Ok(())
}

fn runtime_options(config: &AppConfig) -> RuntimeOptions {
    RuntimeOptions::new()
        .provider(Class::of::<Uptime>())
        .module(Greeter::mount(config.module_options("greeter")))
        .module(Heartbeat::mount(config.module_options("heartbeat")))
}

async fn run(config: &AppConfig) -> Result<()> {
    let runtime = Runtime::new(runtime_options(config))?;
    runtime.init().await?;
    runtime.closed().await;
    Ok(())
}

async fn run_cluster(config: &AppConfig, workers: Option<usize>) -> Result<()> {
    let mut settings = config.cluster.clone();
    if let Some(workers) = workers {
        settings = settings.with_cpus(workers);
    }

    let cluster =
        ClusteredCore::new(ClusterOptions::new(runtime_options(config)).with_settings(settings))?;

    let exits = Arc::new(AtomicUsize::new(0));
    let counter = exits.clone();
    cluster.subscribe(move |event| {
        if matches!(event, ClusterEvent::WorkerExit { .. }) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    });

    cluster.init().await?;

    if let Some(runtime) = cluster.actual_core() {
        runtime.closed().await;
        return Ok(());
    }

    wait_for_shutdown().await?;
    cluster.shutdown().await;
    tracing::info!(
        worker_exits = exits.load(Ordering::Relaxed),
        "Worker pool finished"
    );
    Ok(())
}

/// Process start time, shared by every module.
struct Uptime {
    started: Instant,
}

impl Uptime {
    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Injectable for Uptime {
    fn construct(_deps: Dependencies) -> Result<Self> {
        Ok(Uptime {
            started: Instant::now(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct GreeterOptions {
    greeting: String,
    name: String,
}

impl Default for GreeterOptions {
    fn default() -> Self {
        Self {
            greeting: "hello".to_owned(),
            name: "world".to_owned(),
        }
    }
}

struct Greeter {
    uptime: Option<Arc<Uptime>>,
}

impl Injectable for Greeter {
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::of::<Uptime>()]
    }

    fn construct(deps: Dependencies) -> Result<Self> {
        Ok(Greeter {
            uptime: deps.get(0),
        })
    }
}

#[async_trait]
impl Module for Greeter {
    async fn init(&self, ctx: &InitCtx) -> Result<()> {
        let options: GreeterOptions = ctx.options()?;
        let message = format!("{}, {}!", options.greeting, options.name);
        let since_start = self
            .uptime
            .as_ref()
            .map(|uptime| humantime::format_duration(uptime.elapsed()).to_string());
        tracing::info!(
            worker_id = ctx.runtime().meta().worker_id,
            since_start = since_start.as_deref(),
            "{message}"
        );
        ctx.runtime().storage().insert("greeting", message);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct HeartbeatOptions {
    interval: String,
}

impl Default for HeartbeatOptions {
    fn default() -> Self {
        Self {
            interval: "5s".to_owned(),
        }
    }
}

impl HeartbeatOptions {
    fn interval(&self) -> Result<Duration> {
        let interval = humantime::parse_duration(&self.interval)
            .with_context(|| format!("invalid heartbeat interval '{}'", self.interval))?;
        anyhow::ensure!(!interval.is_zero(), "heartbeat interval must be positive");
        Ok(interval)
    }
}

/// Logs a beat every `interval` until the runtime shuts down.
struct Heartbeat {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Injectable for Heartbeat {
    fn construct(_deps: Dependencies) -> Result<Self> {
        Ok(Heartbeat {
            task: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Module for Heartbeat {
    async fn init(&self, ctx: &InitCtx) -> Result<()> {
        let interval = ctx.options::<HeartbeatOptions>()?.interval()?;
        let cancel = ctx.cancellation_token().clone();
        let worker_id = ctx.runtime().meta().worker_id;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            let mut beats: u64 = 0;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        beats += 1;
                        tracing::info!(worker_id, beats, "heartbeat");
                    }
                }
            }
            tracing::debug!(beats, "heartbeat stopped");
        });
        *self.task.lock() = Some(handle);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            handle.await?;
        }
        Ok(())
    }
}
