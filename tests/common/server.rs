//! Test server lifecycle management
//!
//! This module manages spawning and shutting down test HTTP servers.
//! Each test gets an isolated server with its own databases, media folder
//! and job worker running against fake tools.

use super::constants::*;
use super::fakes::{FakeExtractor, FakeResolver, FakeTranscoder};
use super::fixtures::seed_catalog;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tunefetch_server::catalog::{CatalogSync, ContentionRetry, SqliteCatalogStore};
use tunefetch_server::config::{CatalogSyncSettings, JobSettings};
use tunefetch_server::download_queue::{
    JobContext, JobQueue, JobWorker, SqliteJobQueueStore, UserFolders,
};
use tunefetch_server::progress::ProgressBroadcaster;
use tunefetch_server::server::{make_app, state::ServerState, RequestsLoggingLevel, ServerConfig};
use tunefetch_server::tools::{AudioFormat, ToolChain};

/// Test server instance with isolated storage and a running job worker
///
/// When dropped, the server and the worker shut down and temp resources are
/// cleaned up.
#[allow(dead_code)]
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// Catalog store for direct database access in tests
    pub catalog: Arc<SqliteCatalogStore>,

    /// Root of the per-user output folders
    pub media_path: PathBuf,

    pub resolver: Arc<FakeResolver>,
    pub extractor: Arc<FakeExtractor>,

    // Private fields - keep resources alive until drop
    _temp_dir: TempDir,
    shutdown: CancellationToken,
}

impl TestServer {
    /// Spawns a server whose tools always succeed
    pub async fn spawn() -> Self {
        Self::spawn_with(FakeExtractor::default()).await
    }

    /// Spawns a new test server on a random port
    ///
    /// This function:
    /// 1. Creates temporary catalog and queue databases
    /// 2. Seeds the catalog with the songs in `constants`
    /// 3. Starts a job worker using the given extractor
    /// 4. Binds to a random port (127.0.0.1:0) and serves the app
    /// 5. Waits for the server to be ready
    ///
    /// # Panics
    ///
    /// Panics if any of the above fails.
    pub async fn spawn_with(extractor: FakeExtractor) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let media_path = temp_dir.path().join("media");
        std::fs::create_dir_all(&media_path).expect("Failed to create media dir");

        let catalog = Arc::new(
            SqliteCatalogStore::new(temp_dir.path().join("catalog.db"))
                .expect("Failed to open catalog store"),
        );
        seed_catalog(&catalog).expect("Failed to seed catalog");
        let queue_store = Arc::new(
            SqliteJobQueueStore::new(temp_dir.path().join("queue.db"))
                .expect("Failed to open queue store"),
        );

        // Retries are due immediately so failing jobs settle quickly.
        let job_settings = JobSettings {
            initial_backoff_secs: 0,
            max_backoff_secs: 0,
            poll_interval_secs: 1,
            ..JobSettings::default()
        };
        let catalog_sync = CatalogSync::new(
            catalog.clone(),
            ContentionRetry::new(&CatalogSyncSettings {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 5,
            }),
        );
        let job_queue = Arc::new(JobQueue::new(
            queue_store,
            catalog.clone(),
            Arc::new(ProgressBroadcaster::default()),
            job_settings.max_attempts,
        ));

        let resolver = Arc::new(FakeResolver::default());
        let extractor = Arc::new(extractor);
        let tools = ToolChain {
            resolver: resolver.clone(),
            extractor: extractor.clone(),
            transcoder: Arc::new(FakeTranscoder),
        };
        let folders = UserFolders::new(&media_path);
        let context = JobContext::new(
            catalog.clone(),
            catalog_sync.clone(),
            catalog.clone(),
            tools,
            folders.clone(),
            AudioFormat::Mp3,
        );

        let shutdown = CancellationToken::new();
        let worker = JobWorker::new(job_queue.clone(), context, &job_settings);
        let worker_shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(worker_shutdown).await });

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
            keepalive: Duration::from_secs(1),
            ..ServerConfig::default()
        };
        let app = make_app(ServerState::new(config, job_queue, catalog_sync, folders));

        // Spawn server in background task with graceful shutdown
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            catalog,
            media_path,
            resolver,
            extractor,
            _temp_dir: temp_dir,
            shutdown,
        };

        server.wait_for_ready().await;

        server
    }

    /// Output folder of a user, as laid out by the server
    #[allow(dead_code)]
    pub fn user_dir(&self, user: &str) -> PathBuf {
        UserFolders::new(&self.media_path).user_dir(user)
    }

    /// Waits for the server to become ready by polling the home endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        // TempDir is cleaned up automatically
    }
}
