use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub media_path: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,

    // Feature configs
    pub jobs: Option<JobsConfig>,
    pub catalog_sync: Option<CatalogSyncConfig>,
    pub tools: Option<ToolsConfig>,
    pub live_updates: Option<LiveUpdatesConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct JobsConfig {
    pub max_attempts: Option<u32>,
    pub initial_backoff_secs: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub max_backoff_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,
    pub keep_finished_jobs: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CatalogSyncConfig {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ToolsConfig {
    pub extractor_path: Option<String>,
    pub transcoder_path: Option<String>,
    /// Extra extractor arguments as one shell-quoted string.
    pub extra_extractor_args: Option<String>,
    pub process_timeout_secs: Option<u64>,
    pub default_format: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct LiveUpdatesConfig {
    pub keepalive_secs: Option<u64>,
    pub stream_buffer: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
