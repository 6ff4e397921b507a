use axum::extract::FromRef;
use std::sync::Arc;
use std::time::Instant;

use crate::catalog::{CatalogStore, CatalogSync};
use crate::download_queue::{JobQueue, UserFolders};
use crate::progress::ProgressBroadcaster;

use super::ServerConfig;

pub type GuardedJobQueue = Arc<JobQueue>;
pub type GuardedCatalogStore = Arc<dyn CatalogStore>;
pub type GuardedBroadcaster = Arc<ProgressBroadcaster>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub job_queue: GuardedJobQueue,
    pub catalog_store: GuardedCatalogStore,
    pub catalog_sync: CatalogSync,
    pub broadcaster: GuardedBroadcaster,
    pub folders: UserFolders,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        job_queue: GuardedJobQueue,
        catalog_sync: CatalogSync,
        folders: UserFolders,
    ) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            catalog_store: catalog_sync.store().clone(),
            broadcaster: job_queue.broadcaster().clone(),
            job_queue,
            catalog_sync,
            folders,
        }
    }
}

impl FromRef<ServerState> for GuardedJobQueue {
    fn from_ref(input: &ServerState) -> Self {
        input.job_queue.clone()
    }
}

impl FromRef<ServerState> for GuardedCatalogStore {
    fn from_ref(input: &ServerState) -> Self {
        input.catalog_store.clone()
    }
}

impl FromRef<ServerState> for GuardedBroadcaster {
    fn from_ref(input: &ServerState) -> Self {
        input.broadcaster.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
