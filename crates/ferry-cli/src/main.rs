//! ferry - worker host and queue admin CLI

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ferry_core::config::LogFormat;
use ferry_core::impls::{ProcessIsolation, RedisStore};
use ferry_core::ports::ListStore;
use ferry_core::{
    FerryConfig, QueueClient, QueueListener, QueueName, SandboxManager, TaskId, TaskStorage,
    WorkerMonitor,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Durable task queue worker", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "FERRY_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Store URL
    #[arg(long, global = true)]
    store_url: Option<String>,

    /// Namespace for derived keys
    #[arg(long, global = true)]
    key_prefix: Option<String>,

    /// Log level or filter directive
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drain a queue until Ctrl-C
    Worker {
        #[arg(short, long)]
        queue: Option<String>,

        /// Sandbox executable
        #[arg(long)]
        location: Option<PathBuf>,

        #[arg(long)]
        entry_point: Option<String>,

        #[arg(long)]
        idle_sleep_ms: Option<u64>,
    },
    /// Add a task to a queue
    Enqueue {
        #[arg(short, long)]
        queue: Option<String>,

        #[arg(short, long)]
        parameters: String,

        /// Initial storage entries (key=value)
        #[arg(short, long = "storage", value_parser = parse_key_value)]
        storage: Vec<(String, String)>,
    },
    /// Show list lengths of a queue
    Status {
        #[arg(short, long)]
        queue: Option<String>,
    },
    /// List known queues
    Queues,
    /// Remove a task from every list of its queue
    Remove {
        #[arg(short, long)]
        queue: Option<String>,

        #[arg(long)]
        id: String,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {s:?}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = FerryConfig::load(args.config.as_ref())?;
    if let Some(url) = args.store_url {
        config.store.url = url;
    }
    if let Some(prefix) = args.key_prefix {
        config.store.key_prefix = prefix;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    init_logging(&config)?;

    let store: Arc<dyn ListStore> = Arc::new(
        RedisStore::connect(&config.store)
            .await
            .with_context(|| format!("connecting to {}", config.store.url))?,
    );

    match args.command {
        Command::Worker {
            queue,
            location,
            entry_point,
            idle_sleep_ms,
        } => {
            if let Some(queue) = queue {
                config.queue.name = queue;
            }
            if let Some(location) = location {
                config.sandbox.location = location;
            }
            if let Some(entry_point) = entry_point {
                config.sandbox.entry_point = entry_point;
            }
            if let Some(ms) = idle_sleep_ms {
                config.worker.idle_sleep_ms = ms;
            }
            run_worker(store, config).await
        }
        Command::Enqueue {
            queue,
            parameters,
            storage,
        } => {
            let queue = queue_name(queue, &config)?;
            let client = client(store, &config);
            let task = client
                .new_task(queue, parameters)
                .with_storage(storage.into_iter().collect::<TaskStorage>());
            client.enqueue(&task).await?;
            println!("{}", task.id);
            Ok(())
        }
        Command::Status { queue } => {
            let queue = queue_name(queue, &config)?;
            let counts = client(store, &config).counts(&queue).await?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
            Ok(())
        }
        Command::Queues => {
            for name in client(store, &config).all_queues().await? {
                println!("{name}");
            }
            Ok(())
        }
        Command::Remove { queue, id } => {
            let queue = queue_name(queue, &config)?;
            let id: TaskId = id.parse().with_context(|| format!("invalid task id {id:?}"))?;
            let client = client(store, &config);

            let matches: Vec<_> = client
                .all_tasks(&queue)
                .await?
                .into_iter()
                .filter(|task| task.id == id)
                .collect();
            if matches.is_empty() {
                bail!("task {id} not found in queue {queue}");
            }

            let mut removed = 0;
            for task in &matches {
                removed += client.remove_task(task).await?;
            }
            println!("removed {removed}");
            Ok(())
        }
    }
}

fn queue_name(flag: Option<String>, config: &FerryConfig) -> Result<String> {
    let name = flag.unwrap_or_else(|| config.queue.name.clone());
    if name.trim().is_empty() {
        bail!("no queue specified (use --queue, FERRY_QUEUE or [queue] name)");
    }
    Ok(name)
}

fn client(store: Arc<dyn ListStore>, config: &FerryConfig) -> QueueClient {
    QueueClient::new(store, &config.queue).with_key_prefix(config.store.key_prefix.clone())
}

async fn run_worker(store: Arc<dyn ListStore>, config: FerryConfig) -> Result<()> {
    let queue = queue_name(None, &config)?;
    let names = QueueName::derive_with_prefix(&config.store.key_prefix, &queue)?;

    let isolation = Arc::new(ProcessIsolation::new(config.sandbox.args.clone()));
    let sandbox = SandboxManager::new(
        config.sandbox.clone(),
        config.worker.sandbox_release_retries,
        isolation,
    );
    // fail early on a bad location instead of on the first task
    sandbox.resolve_location()?;

    let worker = Arc::new(WorkerMonitor::new(
        queue.clone(),
        config.worker.clone(),
        client(store.clone(), &config),
        sandbox,
    )?);

    let wake = Arc::clone(&worker);
    let listener = QueueListener::spawn(store, &names, move |_| wake.wake()).await?;

    info!(queue = %queue, version = env!("CARGO_PKG_VERSION"), "ferry worker ready");
    worker.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("shutdown requested");

    listener.stop();
    let stopped = worker.stop().await;
    if let Some(exit) = worker.last_exit() {
        info!(?exit, "worker loop exit");
    }
    if let Err(e) = &stopped {
        warn!(error = %e, "worker did not stop cleanly");
    }
    stopped.map_err(Into::into)
}

fn init_logging(config: &FerryConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("invalid log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let installed = match config.logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install logger: {e}"))
}
