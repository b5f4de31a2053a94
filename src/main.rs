use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chorus::aggregator::Aggregator;
use chorus::banner::{BannerInfo, print_banner, print_worker_summary};
use chorus::config::{Config, PipelineConfig};
use chorus::queue::{MemoryQueue, RedisQueue, TaskQueue};
use chorus::server::{self, AppState};
use chorus::store;
use chorus::types::Prompt;
use chorus::worker::{self, Worker, WorkerConfig};

#[derive(Parser)]
#[command(
    name = "chorus",
    version,
    about = "One prompt, many providers, one merged answer."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Ask every configured provider and print their answers
    Ask {
        prompt: String,

        /// Queue the prompt for a worker instead of waiting for answers
        #[arg(long)]
        queue: bool,
    },
    /// Print the stored result of a queued task
    #[command(name = "result")]
    Lookup { task_id: String },
    /// Print where a queued task is in its lifecycle
    Status { task_id: String },
    /// Process queued tasks until interrupted
    Worker,
    /// Run the HTTP API
    Serve {
        /// Listen address (default from CHORUS_BIND)
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = Config::from_env().context("failed to load configuration")?;

    match cli.command {
        Command::Ask { prompt, queue } => {
            let prompt = Prompt::new(prompt)?;
            if queue {
                enqueue(&config, &prompt).await
            } else {
                ask(&config, &prompt).await
            }
        }
        Command::Lookup { task_id } => lookup(&config, &task_id).await,
        Command::Status { task_id } => status(&config, &task_id).await,
        Command::Worker => run_worker(&config).await,
        Command::Serve { bind } => run_server(&config, bind).await,
    }
}

/// Logs go to stderr so stdout carries only answers.
fn init_logging(cli: &Cli) {
    let default = default_filter(cli);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Long-running commands log progress; one-shot commands stay quiet.
fn default_filter(cli: &Cli) -> &'static str {
    if cli.verbose {
        "chorus=debug"
    } else if matches!(cli.command, Command::Worker | Command::Serve { .. }) {
        "chorus=info"
    } else {
        "chorus=warn"
    }
}

async fn ask(config: &Config, prompt: &Prompt) -> Result<()> {
    let aggregator = Aggregator::from_config(config)?;
    let result = aggregator.merged_results(prompt).await;
    for entry in &result.results {
        println!("{entry}");
    }
    Ok(())
}

async fn enqueue(config: &Config, prompt: &Prompt) -> Result<()> {
    let queue = connect_redis_queue(&config.pipeline).await?;
    let store = store::connect(&config.pipeline).await?;
    let task = worker::submit(
        queue.as_ref(),
        store.as_ref(),
        prompt,
        config.pipeline.result_ttl,
    )
    .await
    .context("failed to enqueue prompt")?;
    println!("Prompt '{prompt}' queued with task ID: {}", task.task_id);
    Ok(())
}

async fn lookup(config: &Config, task_id: &str) -> Result<()> {
    let store = store::connect(&config.pipeline).await?;
    let Some(result) = store
        .get(task_id)
        .await
        .context("failed to fetch result")?
    else {
        println!("No result found for task {task_id}");
        std::process::exit(1);
    };
    for entry in &result.results {
        println!("{entry}");
    }
    Ok(())
}

async fn status(config: &Config, task_id: &str) -> Result<()> {
    let store = store::connect(&config.pipeline).await?;
    match store
        .state(task_id)
        .await
        .context("failed to fetch task state")?
    {
        Some(state) => println!("{task_id}: {state}"),
        None => {
            println!("No task found with ID {task_id}");
            std::process::exit(1);
        }
    }
    Ok(())
}

async fn run_worker(config: &Config) -> Result<()> {
    let aggregator = Arc::new(Aggregator::from_config(config)?);
    let queue = connect_redis_queue(&config.pipeline).await?;
    let store = store::connect(&config.pipeline).await?;

    print_banner(&BannerInfo {
        role: "worker",
        providers: &aggregator.sources(),
        queue: "redis",
        store: &store_label(&config.pipeline),
        ack_mode: &config.pipeline.ack_mode.to_string(),
        concurrency: config.pipeline.worker_concurrency,
        bind: None,
    });

    let worker = Worker::new(queue, store, aggregator, worker_config(&config.pipeline));
    let report = worker.run(shutdown_signal()).await?;
    print_worker_summary(&report);
    Ok(())
}

async fn run_server(config: &Config, bind: Option<SocketAddr>) -> Result<()> {
    let bind = bind.unwrap_or(config.server.bind);
    let aggregator = Arc::new(Aggregator::from_config(config)?);
    let store = store::connect(&config.pipeline).await?;

    // Without Redis the async routes are served by a worker in this process.
    let embedded = config.pipeline.redis_url.is_none();
    let queue: Arc<dyn TaskQueue> = if embedded {
        Arc::new(MemoryQueue::new(config.pipeline.ack_mode))
    } else {
        connect_redis_queue(&config.pipeline).await?
    };

    print_banner(&BannerInfo {
        role: if embedded { "server + worker" } else { "server" },
        providers: &aggregator.sources(),
        queue: if embedded { "memory" } else { "redis" },
        store: &store_label(&config.pipeline),
        ack_mode: &config.pipeline.ack_mode.to_string(),
        concurrency: config.pipeline.worker_concurrency,
        bind: Some(&bind.to_string()),
    });

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    });

    let embedded_worker = embedded.then(|| {
        let worker = Worker::new(
            Arc::clone(&queue),
            Arc::clone(&store),
            Arc::clone(&aggregator),
            worker_config(&config.pipeline),
        );
        let stopped = wait_for_stop(stop_rx.clone());
        tokio::spawn(async move { worker.run(stopped).await })
    });

    let state = AppState {
        aggregator,
        queue,
        store,
        result_ttl: config.pipeline.result_ttl,
        strict_status: config.server.strict_status,
    };
    server::serve(bind, state, wait_for_stop(stop_rx)).await?;

    if let Some(handle) = embedded_worker {
        let report = handle.await.context("embedded worker panicked")??;
        print_worker_summary(&report);
    }
    info!("server stopped");
    Ok(())
}

async fn connect_redis_queue(pipeline: &PipelineConfig) -> Result<Arc<dyn TaskQueue>> {
    let url = pipeline
        .redis_url
        .as_deref()
        .context("REDIS_URL must be set to use the task queue")?;
    let queue = RedisQueue::connect(url, &pipeline.key_prefix, pipeline.ack_mode)
        .await
        .context("failed to connect to Redis task queue")?;
    Ok(Arc::new(queue))
}

fn worker_config(pipeline: &PipelineConfig) -> WorkerConfig {
    WorkerConfig {
        result_ttl: pipeline.result_ttl,
        concurrency: pipeline.worker_concurrency,
        ..WorkerConfig::default()
    }
}

fn store_label(pipeline: &PipelineConfig) -> String {
    match &pipeline.redis_url {
        Some(_) => "redis".to_string(),
        None => format!("sqlite ({})", pipeline.db_path.display()),
    }
}

fn wait_for_stop(mut rx: watch::Receiver<bool>) -> impl Future<Output = ()> + Send + 'static {
    async move {
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_for(args: &[&str]) -> &'static str {
        default_filter(&Cli::parse_from(args))
    }

    #[test]
    fn long_running_commands_log_at_info() {
        assert_eq!(filter_for(&["chorus", "worker"]), "chorus=info");
        assert_eq!(filter_for(&["chorus", "serve"]), "chorus=info");
    }

    #[test]
    fn one_shot_commands_log_at_warn() {
        assert_eq!(filter_for(&["chorus", "ask", "hi"]), "chorus=warn");
        assert_eq!(filter_for(&["chorus", "result", "t1"]), "chorus=warn");
        assert_eq!(filter_for(&["chorus", "status", "t1"]), "chorus=warn");
    }

    #[test]
    fn verbose_wins_for_any_command() {
        assert_eq!(filter_for(&["chorus", "-v", "ask", "hi"]), "chorus=debug");
        assert_eq!(filter_for(&["chorus", "worker", "--verbose"]), "chorus=debug");
    }
}
