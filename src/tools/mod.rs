//! External tool chain: source resolution, audio extraction and transcoding.

mod extractor;
mod formats;
mod output_parser;
mod process;
mod resolver;
mod transcoder;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub use extractor::{AudioExtractor, ExtractOutcome, ProgressCallback, YtDlpExtractor};
pub use formats::{content_type_for, AudioFormat};
pub use output_parser::{parse_line, BatchTracker, ToolProgress};
pub use process::{run_tool, OutputStream, ProcessOutput, ToolCommand};
pub use resolver::{parse_dump_json, source_query, MetadataResolver, ResolvedSource, YtDlpResolver};
pub use transcoder::{AudioTranscoder, FfmpegTranscoder};

use crate::config::ToolSettings;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} exited with code {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("No output: {0}")]
    NoOutput(String),

    #[error("Invalid tool output: {0}")]
    InvalidOutput(String),

    #[error("Cannot resolve source: {0}")]
    Unresolvable(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The three external collaborators a job needs.
#[derive(Clone)]
pub struct ToolChain {
    pub resolver: Arc<dyn MetadataResolver>,
    pub extractor: Arc<dyn AudioExtractor>,
    pub transcoder: Arc<dyn AudioTranscoder>,
}

impl ToolChain {
    pub fn from_settings(settings: &ToolSettings) -> Self {
        let timeout = Duration::from_secs(settings.process_timeout_secs);
        Self {
            resolver: Arc::new(YtDlpResolver::new(
                &settings.extractor_path,
                settings.extra_extractor_args.clone(),
                timeout,
            )),
            extractor: Arc::new(YtDlpExtractor::new(
                &settings.extractor_path,
                settings.extra_extractor_args.clone(),
                timeout,
            )),
            transcoder: Arc::new(FfmpegTranscoder::new(&settings.transcoder_path, timeout)),
        }
    }
}
