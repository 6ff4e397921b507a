//! Turns a catalog song reference into something the extractor can fetch.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::process::{run_tool, ToolCommand};
use super::ToolError;
use crate::catalog::{Platform, Song};

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSource {
    pub url: String,
    pub title: String,
    pub artist: Option<String>,
    pub duration_secs: Option<f64>,
}

#[async_trait]
pub trait MetadataResolver: Send + Sync {
    async fn resolve(&self, song: &Song, cancel: &CancellationToken) -> Result<ResolvedSource, ToolError>;
}

/// Query handed to the extraction tool for a song.
///
/// Spotify tracks cannot be fetched directly, so they become a search for
/// the best YouTube hit. YouTube references without a URL fall back to the
/// same search; arbitrary URLs must carry one.
pub fn source_query(song: &Song) -> Result<String, ToolError> {
    let search = || {
        if song.title.trim().is_empty() {
            return Err(ToolError::Unresolvable(format!(
                "song {} has no title to search for",
                song.id
            )));
        }
        Ok(format!("ytsearch1:{}", song.display_label()))
    };
    match (song.platform, song.source_url.as_deref()) {
        (Platform::Spotify, _) => search(),
        (Platform::Youtube, Some(url)) if !url.trim().is_empty() => Ok(url.trim().to_string()),
        (Platform::Youtube, _) => search(),
        (Platform::Url, Some(url)) if !url.trim().is_empty() => Ok(url.trim().to_string()),
        (Platform::Url, _) => Err(ToolError::Unresolvable(format!(
            "song {} has no source URL",
            song.id
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct DumpJson {
    webpage_url: Option<String>,
    original_url: Option<String>,
    url: Option<String>,
    title: Option<String>,
    artist: Option<String>,
    uploader: Option<String>,
    duration: Option<f64>,
}

/// Extracts the resolved source from `--dump-json` output.
pub fn parse_dump_json(lines: &[String]) -> Result<ResolvedSource, ToolError> {
    let line = lines
        .iter()
        .rev()
        .find(|l| l.trim_start().starts_with('{'))
        .ok_or_else(|| ToolError::NoOutput("resolver printed no metadata".to_string()))?;
    let dump: DumpJson =
        serde_json::from_str(line).map_err(|e| ToolError::InvalidOutput(e.to_string()))?;
    let url = dump
        .webpage_url
        .or(dump.original_url)
        .or(dump.url)
        .ok_or_else(|| ToolError::InvalidOutput("metadata has no URL".to_string()))?;
    Ok(ResolvedSource {
        url,
        title: dump.title.unwrap_or_default(),
        artist: dump.artist.or(dump.uploader),
        duration_secs: dump.duration,
    })
}

pub struct YtDlpResolver {
    program: String,
    extra_args: Vec<String>,
    timeout: Duration,
}

impl YtDlpResolver {
    pub fn new(program: &str, extra_args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            extra_args,
            timeout,
        }
    }
}

#[async_trait]
impl MetadataResolver for YtDlpResolver {
    async fn resolve(&self, song: &Song, cancel: &CancellationToken) -> Result<ResolvedSource, ToolError> {
        let query = source_query(song)?;
        let command = ToolCommand::new(&self.program, self.timeout)
            .args(["--dump-json", "--skip-download", "--no-playlist"])
            .args(self.extra_args.iter().cloned())
            .arg(query.clone())
            .capture_stdout();
        let output = run_tool(&command, cancel, |_, _| {}).await?;
        let resolved = parse_dump_json(&output.stdout)?;
        debug!("Resolved '{}' to {}", query, resolved.url);
        Ok(resolved)
    }
}
