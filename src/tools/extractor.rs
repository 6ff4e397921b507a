//! External audio extraction (download + encode) tool.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::formats::AudioFormat;
use super::output_parser::{parse_line, ToolProgress};
use super::process::{run_tool, ToolCommand};
use super::ToolError;

pub type ProgressCallback<'a> = &'a mut (dyn FnMut(ToolProgress) + Send);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractOutcome {
    /// Files the tool reported as finished.
    pub files: Vec<PathBuf>,
    /// `ERROR:` lines, and the exit failure for batches that partially failed.
    pub errors: Vec<String>,
}

#[async_trait]
pub trait AudioExtractor: Send + Sync {
    /// Downloads a single URL into `output_dir`. Any tool failure is an error.
    async fn download(
        &self,
        url: &str,
        output_dir: &Path,
        format: AudioFormat,
        cancel: &CancellationToken,
        on_progress: ProgressCallback<'_>,
    ) -> Result<ExtractOutcome, ToolError>;

    /// Downloads every URL listed in `batch_file` with one tool invocation.
    ///
    /// Per-item failures do not fail the call; they end up in
    /// [`ExtractOutcome::errors`].
    async fn download_batch(
        &self,
        batch_file: &Path,
        output_dir: &Path,
        format: AudioFormat,
        cancel: &CancellationToken,
        on_progress: ProgressCallback<'_>,
    ) -> Result<ExtractOutcome, ToolError>;
}

pub struct YtDlpExtractor {
    program: String,
    extra_args: Vec<String>,
    timeout: Duration,
}

impl YtDlpExtractor {
    pub fn new(program: &str, extra_args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            extra_args,
            timeout,
        }
    }

    fn base_command(&self, output_dir: &Path, format: AudioFormat) -> ToolCommand {
        let template = output_dir.join("%(title)s.%(ext)s");
        ToolCommand::new(&self.program, self.timeout)
            .args([
                "--extract-audio",
                "--audio-format",
                format.extractor_format().as_str(),
                "--audio-quality",
                "0",
                "--embed-metadata",
                "--embed-thumbnail",
                "--no-playlist",
                "--newline",
            ])
            .arg("-o")
            .arg(template.to_string_lossy().to_string())
            .args(self.extra_args.iter().cloned())
    }

    async fn run(
        &self,
        command: ToolCommand,
        cancel: &CancellationToken,
        on_progress: ProgressCallback<'_>,
    ) -> Result<ExtractOutcome, (ToolError, ExtractOutcome)> {
        let mut outcome = ExtractOutcome::default();
        let result = run_tool(&command, cancel, |_, line| {
            debug!("{}: {}", self.program, line);
            if let Some(progress) = parse_line(line) {
                match &progress {
                    ToolProgress::ExtractedAudio(path) | ToolProgress::AlreadyDownloaded(path) => {
                        if !outcome.files.contains(path) {
                            outcome.files.push(path.clone());
                        }
                    }
                    ToolProgress::Error(message) => outcome.errors.push(message.clone()),
                    _ => {}
                }
                on_progress(progress);
            }
        })
        .await;
        match result {
            Ok(_) => Ok(outcome),
            Err(e) => Err((e, outcome)),
        }
    }
}

#[async_trait]
impl AudioExtractor for YtDlpExtractor {
    async fn download(
        &self,
        url: &str,
        output_dir: &Path,
        format: AudioFormat,
        cancel: &CancellationToken,
        on_progress: ProgressCallback<'_>,
    ) -> Result<ExtractOutcome, ToolError> {
        let command = self.base_command(output_dir, format).arg(url);
        self.run(command, cancel, on_progress)
            .await
            .map_err(|(e, _)| e)
    }

    async fn download_batch(
        &self,
        batch_file: &Path,
        output_dir: &Path,
        format: AudioFormat,
        cancel: &CancellationToken,
        on_progress: ProgressCallback<'_>,
    ) -> Result<ExtractOutcome, ToolError> {
        let command = self
            .base_command(output_dir, format)
            .arg("--ignore-errors")
            .arg("--batch-file")
            .arg(batch_file.to_string_lossy().to_string());
        match self.run(command, cancel, on_progress).await {
            Ok(outcome) => Ok(outcome),
            Err((ToolError::Failed { code, stderr, .. }, mut outcome)) => {
                warn!(
                    "Batch extraction exited with {:?}, {} files reported",
                    code,
                    outcome.files.len()
                );
                if outcome.errors.is_empty() {
                    outcome.errors.push(stderr);
                }
                Ok(outcome)
            }
            Err((e, _)) => Err(e),
        }
    }
}
