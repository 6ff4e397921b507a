//! Stand-ins for the external tool chain.
//!
//! The fake extractor writes a small text file named after the song for every
//! URL it is given, so the matcher and archive builder run for real.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tunefetch_server::catalog::Song;
use tunefetch_server::tools::{
    AudioExtractor, AudioFormat, AudioTranscoder, ExtractOutcome, MetadataResolver,
    ProgressCallback, ResolvedSource, ToolError, ToolProgress,
};

const URL_PREFIX: &str = "fake://";

#[derive(Default)]
pub struct FakeResolver {
    unresolvable: Mutex<HashSet<String>>,
}

impl FakeResolver {
    /// Makes `song_id` fail resolution from now on.
    pub fn make_unresolvable(&self, song_id: &str) {
        self.unresolvable.lock().unwrap().insert(song_id.to_string());
    }
}

#[async_trait]
impl MetadataResolver for FakeResolver {
    async fn resolve(
        &self,
        song: &Song,
        _cancel: &CancellationToken,
    ) -> Result<ResolvedSource, ToolError> {
        if self.unresolvable.lock().unwrap().contains(&song.id) {
            return Err(ToolError::Unresolvable(format!("no source for {}", song.id)));
        }
        Ok(ResolvedSource {
            url: format!("{}{}", URL_PREFIX, song.display_label()),
            title: song.title.clone(),
            artist: song.artists.first().map(str::to_string),
            duration_secs: Some(200.0),
        })
    }
}

#[derive(Default)]
pub struct FakeExtractor {
    failures_left: AtomicU32,
    calls: AtomicU32,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
    skipped: Mutex<HashSet<String>>,
}

impl FakeExtractor {
    /// Fails the next `times` runs like a crashing tool.
    pub fn failing(times: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(times),
            ..Default::default()
        }
    }

    /// Each run signals `started`, then blocks until `release` is notified.
    pub fn gated(started: Arc<Notify>, release: Arc<Notify>) -> Self {
        Self {
            gate: Some((started, release)),
            ..Default::default()
        }
    }

    /// Batch runs report `label` ("Artist - Title") as unavailable and
    /// write nothing for it.
    pub fn skip(&self, label: &str) {
        self.skipped.lock().unwrap().insert(label.to_string());
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn before_run(&self) -> Result<(), ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((started, release)) = &self.gate {
            started.notify_one();
            release.notified().await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ToolError::Failed {
                program: "fake-extractor".into(),
                code: Some(1),
                stderr: "simulated failure".into(),
            });
        }
        Ok(())
    }

    fn label(url: &str) -> &str {
        url.strip_prefix(URL_PREFIX).unwrap_or(url)
    }

    fn write(url: &str, dir: &Path, format: AudioFormat) -> Result<PathBuf, ToolError> {
        let label = Self::label(url);
        let path = dir.join(format!("{}.{}", label, format.extractor_format().extension()));
        std::fs::write(&path, format!("audio of {}", label))?;
        Ok(path)
    }
}

#[async_trait]
impl AudioExtractor for FakeExtractor {
    async fn download(
        &self,
        url: &str,
        output_dir: &Path,
        format: AudioFormat,
        _cancel: &CancellationToken,
        on_progress: ProgressCallback<'_>,
    ) -> Result<ExtractOutcome, ToolError> {
        self.before_run().await?;
        on_progress(ToolProgress::Percent(50.0));
        let path = Self::write(url, output_dir, format)?;
        on_progress(ToolProgress::Percent(100.0));
        Ok(ExtractOutcome {
            files: vec![path],
            errors: vec![],
        })
    }

    async fn download_batch(
        &self,
        batch_file: &Path,
        output_dir: &Path,
        format: AudioFormat,
        _cancel: &CancellationToken,
        on_progress: ProgressCallback<'_>,
    ) -> Result<ExtractOutcome, ToolError> {
        self.before_run().await?;
        let urls = std::fs::read_to_string(batch_file)?;
        let urls: Vec<&str> = urls.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut outcome = ExtractOutcome::default();
        for (idx, url) in urls.iter().enumerate() {
            on_progress(ToolProgress::ItemIndex {
                current: idx + 1,
                total: urls.len(),
            });
            if self.skipped.lock().unwrap().contains(Self::label(url)) {
                outcome
                    .errors
                    .push(format!("ERROR: [fake] {}: Video unavailable", Self::label(url)));
                continue;
            }
            let path = Self::write(url, output_dir, format)?;
            on_progress(ToolProgress::ExtractedAudio(path.clone()));
            outcome.files.push(path);
        }
        Ok(outcome)
    }
}

pub struct FakeTranscoder;

#[async_trait]
impl AudioTranscoder for FakeTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        target: AudioFormat,
        _cancel: &CancellationToken,
    ) -> Result<PathBuf, ToolError> {
        let output = input.with_extension(target.extension());
        std::fs::rename(input, &output)?;
        Ok(output)
    }
}
