//! In-process stand-ins for the external tools, plus a ready-made queue
//! fixture for worker tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::catalog::{ArtistList, CatalogSync, ContentionRetry, Platform, Song, SqliteCatalogStore};
use crate::config::{CatalogSyncSettings, JobSettings};
use crate::progress::{ProgressBroadcaster, ProgressEvent};
use crate::tools::{
    AudioExtractor, AudioFormat, AudioTranscoder, ExtractOutcome, MetadataResolver,
    ProgressCallback, ResolvedSource, ToolChain, ToolError, ToolProgress,
};

use super::context::JobContext;
use super::folders::UserFolders;
use super::manager::JobQueue;
use super::queue_store::{JobQueueStore, SqliteJobQueueStore};
use super::worker::JobWorker;

const URL_PREFIX: &str = "fake://";

#[derive(Default)]
pub struct FakeResolver {
    pub unresolvable: Mutex<HashSet<String>>,
}

#[async_trait]
impl MetadataResolver for FakeResolver {
    async fn resolve(&self, song: &Song, _cancel: &CancellationToken) -> Result<ResolvedSource, ToolError> {
        if self.unresolvable.lock().unwrap().contains(&song.id) {
            return Err(ToolError::Unresolvable(format!("no source for {}", song.id)));
        }
        Ok(ResolvedSource {
            url: format!("{}{}", URL_PREFIX, song.display_label()),
            title: song.title.clone(),
            artist: song.artists.first().map(str::to_string),
            duration_secs: Some(180.0),
        })
    }
}

/// Writes `<label>.<ext>` for every URL it is given.
#[derive(Default)]
pub struct FakeExtractor {
    /// Number of upcoming calls that fail like a crashing tool.
    pub failures_left: AtomicU32,
    pub calls: AtomicU32,
    /// When set, downloads wait for `release` after signalling `started`.
    pub gate: Option<(Arc<Notify>, Arc<Notify>)>,
    /// Labels a batch run reports as unavailable instead of writing.
    pub skipped: Mutex<HashSet<String>>,
    /// Label to file stem overrides, for tools that name files their own way.
    pub renamed: Mutex<HashMap<String, String>>,
}

impl FakeExtractor {
    pub fn failing(times: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(times),
            ..Default::default()
        }
    }

    pub fn gated(started: Arc<Notify>, release: Arc<Notify>) -> Self {
        Self {
            gate: Some((started, release)),
            ..Default::default()
        }
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

    fn write(&self, url: &str, dir: &Path, format: AudioFormat) -> Result<PathBuf, ToolError> {
        let label = Self::label(url);
        let stem = self
            .renamed
            .lock()
            .unwrap()
            .get(label)
            .cloned()
            .unwrap_or_else(|| label.to_string());
        let path = dir.join(format!("{}.{}", stem, format.extractor_format().extension()));
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
        on_progress(ToolProgress::Percent(40.0));
        let path = self.write(url, output_dir, format)?;
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
            let path = self.write(url, output_dir, format)?;
            on_progress(ToolProgress::Percent(100.0));
            on_progress(ToolProgress::ExtractedAudio(path.clone()));
            outcome.files.push(path);
        }
        Ok(outcome)
    }
}

/// Swaps the extension, as if the file had been re-encoded.
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

pub struct Harness {
    pub queue: Arc<JobQueue>,
    pub worker: JobWorker,
    pub catalog: Arc<SqliteCatalogStore>,
    pub store: Arc<SqliteJobQueueStore>,
    pub resolver: Arc<FakeResolver>,
    pub extractor: Arc<FakeExtractor>,
    pub events: Arc<Mutex<Vec<ProgressEvent>>>,
    pub media: TempDir,
}

impl Harness {
    pub fn new(extractor: FakeExtractor) -> Self {
        let catalog = Arc::new(SqliteCatalogStore::in_memory().unwrap());
        let store = Arc::new(SqliteJobQueueStore::in_memory().unwrap());
        let broadcaster = Arc::new(ProgressBroadcaster::default());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        broadcaster.subscribe(
            "alice",
            Arc::new(move |e: &ProgressEvent| sink.lock().unwrap().push(e.clone())),
        );

        // No backoff so retries are immediately due.
        let settings = JobSettings {
            initial_backoff_secs: 0,
            max_backoff_secs: 0,
            ..JobSettings::default()
        };
        let queue = Arc::new(JobQueue::new(
            store.clone(),
            catalog.clone(),
            broadcaster,
            settings.max_attempts,
        ));

        let resolver = Arc::new(FakeResolver::default());
        let extractor = Arc::new(extractor);
        let tools = ToolChain {
            resolver: resolver.clone(),
            extractor: extractor.clone(),
            transcoder: Arc::new(FakeTranscoder),
        };
        let media = TempDir::new().unwrap();
        let sync_settings = CatalogSyncSettings {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
        };
        let context = JobContext::new(
            catalog.clone(),
            CatalogSync::new(catalog.clone(), ContentionRetry::new(&sync_settings)),
            catalog.clone(),
            tools,
            UserFolders::new(media.path()),
            AudioFormat::Mp3,
        );
        let worker = JobWorker::new(queue.clone(), context, &settings);

        Self {
            queue,
            worker,
            catalog,
            store,
            resolver,
            extractor,
            events,
            media,
        }
    }

    pub fn add_song(&self, id: &str, artist: &str, title: &str) {
        let song = Song::new(id, "alice", title, Platform::Youtube)
            .with_artists(ArtistList::parse(artist))
            .with_source_url(&format!("https://example.com/watch?v={}", id));
        self.catalog.upsert_song(&song).unwrap();
    }

    /// Runs queued jobs until nothing is ready.
    pub async fn drain(&self) {
        let shutdown = CancellationToken::new();
        while self.worker.run_next(&shutdown).await.unwrap() {}
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn job(&self, id: &str) -> super::models::Job {
        self.store.get(id).unwrap().unwrap()
    }
}
