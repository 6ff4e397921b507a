use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use std::{fmt::Debug, path::PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tunefetch_server::catalog::{CatalogStore, CatalogSync, ContentionRetry, SqliteCatalogStore};
use tunefetch_server::config::{AppConfig, CliConfig, FileConfig};
use tunefetch_server::download_queue::{
    JobContext, JobQueue, JobQueueStore, JobWorker, SqliteJobQueueStore, UserFolders,
};
use tunefetch_server::progress::ProgressBroadcaster;
use tunefetch_server::server::{self, metrics, state::ServerState, RequestsLoggingLevel, ServerConfig};
use tunefetch_server::tools::ToolChain;

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Its values override the CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding the catalog and job queue databases.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Root of the per-user output folders. Defaults to the db directory.
    #[clap(long, value_parser = parse_path)]
    pub media_path: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,
}

async fn wait_for_ctrl_c(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => error!("Cannot listen for shutdown signal: {}", e),
    }
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config file {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir.clone(),
        media_path: cli_args.media_path.clone(),
        port: cli_args.port,
        metrics_port: cli_args.metrics_port,
        logging_level: cli_args.logging_level.clone(),
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Initializing metrics...");
    metrics::init_metrics();

    info!("Opening catalog database at {:?}...", config.catalog_db_path());
    let catalog = Arc::new(SqliteCatalogStore::new(config.catalog_db_path())?);
    info!("Opening job queue database at {:?}...", config.queue_db_path());
    let queue_store: Arc<dyn JobQueueStore> =
        Arc::new(SqliteJobQueueStore::new(config.queue_db_path())?);

    let catalog_store: Arc<dyn CatalogStore> = catalog.clone();
    let catalog_sync = CatalogSync::new(
        catalog_store.clone(),
        ContentionRetry::new(&config.catalog_sync),
    );
    let broadcaster = Arc::new(ProgressBroadcaster::new(config.live_updates.stream_buffer));
    let job_queue = Arc::new(JobQueue::new(
        queue_store,
        catalog_store.clone(),
        broadcaster,
        config.jobs.max_attempts,
    ));

    let folders = UserFolders::new(&config.media_path);
    folders.clear_stale_staging();

    let shutdown = CancellationToken::new();

    let context = JobContext::new(
        catalog_store,
        catalog_sync.clone(),
        catalog,
        ToolChain::from_settings(&config.tools),
        folders.clone(),
        config.tools.default_format,
    );
    let worker = JobWorker::new(job_queue.clone(), context, &config.jobs);
    let recovery = worker.recover_interrupted().await?;
    if recovery.requeued > 0 || !recovery.exhausted.is_empty() {
        info!(
            "Recovered interrupted jobs: {} requeued, {} failed",
            recovery.requeued,
            recovery.exhausted.len()
        );
    }
    let worker_shutdown = shutdown.clone();
    let worker_handle = tokio::spawn(async move { worker.run(worker_shutdown).await });

    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::run_metrics_server(metrics_port).await {
            error!("Metrics server failed: {}", e);
        }
    });

    tokio::spawn(wait_for_ctrl_c(shutdown.clone()));

    let server_config = ServerConfig {
        requests_logging_level: config.logging_level.clone(),
        port: config.port,
        keepalive: Duration::from_secs(config.live_updates.keepalive_secs),
        ..ServerConfig::default()
    };
    let state = ServerState::new(server_config, job_queue, catalog_sync, folders);

    info!("Ready to serve at port {}!", config.port);
    let served = server::run_server(state, shutdown.clone()).await;
    shutdown.cancel();

    if let Err(e) = worker_handle.await {
        error!("Job worker panicked: {}", e);
    }
    served
}
