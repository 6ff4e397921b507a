//! Lossless-to-lossless conversion for formats the extractor cannot emit.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::formats::AudioFormat;
use super::process::{run_tool, ToolCommand};
use super::ToolError;

#[async_trait]
pub trait AudioTranscoder: Send + Sync {
    /// Converts `input` to `target`, keeping its tags. Returns the new path;
    /// the input file is removed on success.
    async fn transcode(
        &self,
        input: &Path,
        target: AudioFormat,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, ToolError>;
}

fn codec_for(format: AudioFormat) -> &'static str {
    match format {
        AudioFormat::Mp3 => "libmp3lame",
        AudioFormat::Flac => "flac",
        AudioFormat::Opus => "libopus",
        AudioFormat::M4a => "aac",
        AudioFormat::Wav => "pcm_s16le",
        AudioFormat::Alac => "alac",
        AudioFormat::Aiff => "pcm_s16be",
    }
}

pub fn transcode_command(program: &str, timeout: Duration, input: &Path, output: &Path, target: AudioFormat) -> ToolCommand {
    let mut command = ToolCommand::new(program, timeout)
        .args(["-y", "-hide_banner", "-loglevel", "error", "-i"])
        .arg(input.to_string_lossy().to_string())
        .args(["-map", "0:a", "-map_metadata", "0", "-c:a", codec_for(target)]);
    if target == AudioFormat::Aiff {
        command = command.args(["-write_id3v2", "1"]);
    }
    command.arg(output.to_string_lossy().to_string())
}

pub struct FfmpegTranscoder {
    program: String,
    timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(program: &str, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl AudioTranscoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        target: AudioFormat,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, ToolError> {
        let output = input.with_extension(target.extension());
        if output == input {
            return Ok(output);
        }
        let command = transcode_command(&self.program, self.timeout, input, &output, target);
        run_tool(&command, cancel, |_, _| {}).await?;

        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Err(ToolError::NoOutput(format!(
                "{} produced no {:?}",
                self.program, output
            )));
        }
        if let Err(e) = tokio::fs::remove_file(input).await {
            warn!("Could not remove transcode input {:?}: {}", input, e);
        }
        info!("Transcoded {:?} to {}", input, target);
        Ok(output)
    }
}
