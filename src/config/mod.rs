mod file_config;

pub use file_config::{CatalogSyncConfig, FileConfig, JobsConfig, LiveUpdatesConfig, ToolsConfig};

use crate::server::RequestsLoggingLevel;
use crate::tools::AudioFormat;
use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub media_path: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub media_path: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,

    pub jobs: JobSettings,
    pub catalog_sync: CatalogSyncSettings,
    pub tools: ToolSettings,
    pub live_updates: LiveUpdateSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let media_path = file
            .media_path
            .map(PathBuf::from)
            .or_else(|| cli.media_path.clone())
            .unwrap_or_else(|| db_dir.clone());

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let jobs_file = file.jobs.unwrap_or_default();
        let job_defaults = JobSettings::default();
        let jobs = JobSettings {
            max_attempts: jobs_file
                .max_attempts
                .unwrap_or(job_defaults.max_attempts)
                .max(1),
            initial_backoff_secs: jobs_file
                .initial_backoff_secs
                .unwrap_or(job_defaults.initial_backoff_secs),
            backoff_multiplier: jobs_file
                .backoff_multiplier
                .unwrap_or(job_defaults.backoff_multiplier),
            max_backoff_secs: jobs_file
                .max_backoff_secs
                .unwrap_or(job_defaults.max_backoff_secs),
            poll_interval_secs: jobs_file
                .poll_interval_secs
                .unwrap_or(job_defaults.poll_interval_secs)
                .max(1),
            keep_finished_jobs: jobs_file
                .keep_finished_jobs
                .unwrap_or(job_defaults.keep_finished_jobs),
        };

        let sync_file = file.catalog_sync.unwrap_or_default();
        let sync_defaults = CatalogSyncSettings::default();
        let catalog_sync = CatalogSyncSettings {
            max_attempts: sync_file.max_attempts.unwrap_or(sync_defaults.max_attempts),
            base_delay_ms: sync_file
                .base_delay_ms
                .unwrap_or(sync_defaults.base_delay_ms),
            max_delay_ms: sync_file.max_delay_ms.unwrap_or(sync_defaults.max_delay_ms),
        };

        let tools_file = file.tools.unwrap_or_default();
        let tool_defaults = ToolSettings::default();
        let extra_extractor_args = match tools_file.extra_extractor_args {
            Some(raw) => shlex::split(&raw)
                .with_context(|| format!("Cannot split extra_extractor_args: {}", raw))?,
            None => tool_defaults.extra_extractor_args.clone(),
        };
        let default_format = match tools_file.default_format {
            Some(raw) => AudioFormat::from_str(&raw)
                .with_context(|| format!("Unknown default_format: {}", raw))?,
            None => tool_defaults.default_format,
        };
        let tools = ToolSettings {
            extractor_path: tools_file
                .extractor_path
                .unwrap_or(tool_defaults.extractor_path),
            transcoder_path: tools_file
                .transcoder_path
                .unwrap_or(tool_defaults.transcoder_path),
            extra_extractor_args,
            process_timeout_secs: tools_file
                .process_timeout_secs
                .unwrap_or(tool_defaults.process_timeout_secs),
            default_format,
        };

        let live_file = file.live_updates.unwrap_or_default();
        let live_defaults = LiveUpdateSettings::default();
        let live_updates = LiveUpdateSettings {
            keepalive_secs: live_file
                .keepalive_secs
                .unwrap_or(live_defaults.keepalive_secs)
                .max(1),
            stream_buffer: live_file
                .stream_buffer
                .unwrap_or(live_defaults.stream_buffer)
                .max(1),
        };

        Ok(Self {
            db_dir,
            media_path,
            port,
            metrics_port,
            logging_level,
            jobs,
            catalog_sync,
            tools,
            live_updates,
        })
    }

    pub fn catalog_db_path(&self) -> PathBuf {
        self.db_dir.join("catalog.db")
    }

    pub fn queue_db_path(&self) -> PathBuf {
        self.db_dir.join("queue.db")
    }
}

#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Total executions per job, first run included.
    pub max_attempts: u32,
    pub initial_backoff_secs: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_secs: u64,
    /// Upper bound on how long the idle worker sleeps between queue polls.
    pub poll_interval_secs: u64,
    /// Finished jobs kept per queue before the oldest are pruned.
    pub keep_finished_jobs: usize,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_secs: 5,
            backoff_multiplier: 2.0,
            max_backoff_secs: 300,
            poll_interval_secs: 2,
            keep_finished_jobs: 500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatalogSyncSettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for CatalogSyncSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 5000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub extractor_path: String,
    pub transcoder_path: String,
    pub extra_extractor_args: Vec<String>,
    pub process_timeout_secs: u64,
    /// Used when a user has no stored format preference.
    pub default_format: AudioFormat,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            extractor_path: "yt-dlp".to_string(),
            transcoder_path: "ffmpeg".to_string(),
            extra_extractor_args: Vec::new(),
            process_timeout_secs: 1800,
            default_format: AudioFormat::Mp3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LiveUpdateSettings {
    pub keepalive_secs: u64,
    pub stream_buffer: usize,
}

impl Default for LiveUpdateSettings {
    fn default() -> Self {
        Self {
            keepalive_secs: 15,
            stream_buffer: 64,
        }
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
