//! Bulk job execution.
//!
//! Sources are resolved one by one, then fetched with a single extractor run
//! over a batch file. Produced files are associated back to songs, zipped
//! into `archives/<job>.zip` and kept in the user's bulk folder. Individual
//! failures are reported and counted; only a batch that yields nothing fails
//! the job.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::archive::{build_archive, ArchiveManifest};
use crate::catalog::Song;
use crate::matcher::{associate_files, list_candidate_files, MatchTarget};
use crate::tools::{AudioFormat, BatchTracker, ToolError, ToolProgress};

use super::context::JobContext;
use super::models::{Job, JobError, JobErrorType, JobResult};
use super::progress_notifier::JobReporter;
use super::single_job::{move_file, recreate_dir};

const RESOLVE_END: u8 = 20;
const DOWNLOAD_END: u8 = 75;
const CONVERT_END: u8 = 80;
const ARCHIVE_END: u8 = 95;

const BATCH_FILE_NAME: &str = ".batch.txt";

pub async fn run_bulk(
    ctx: &JobContext,
    job: &Job,
    song_ids: &[String],
    reporter: &JobReporter,
) -> Result<JobResult, JobError> {
    let staging = ctx.folders.staging_dir(&job.user_id, &job.id);
    let result = execute(ctx, job, song_ids, &staging, reporter).await;
    if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Cannot remove staging directory {:?}: {}", staging, e);
        }
    }
    result
}

async fn execute(
    ctx: &JobContext,
    job: &Job,
    song_ids: &[String],
    staging: &Path,
    reporter: &JobReporter,
) -> Result<JobResult, JobError> {
    let songs = ctx.catalog_store.get_songs_by_ids(song_ids)?;
    for missing in song_ids.iter().filter(|id| !songs.iter().any(|s| &s.id == *id)) {
        warn!("Job {}: song {} no longer exists", job.id, missing);
        reporter.item_failed(missing, "Song not found");
    }
    if songs.is_empty() {
        return Err(JobError::new(
            JobErrorType::NotFound,
            "None of the requested songs exist",
        ));
    }
    let format = ctx.preferred_format(&job.user_id)?;
    let bulk_dir = ctx.folders.bulk_dir(&job.user_id);
    tokio::fs::create_dir_all(&bulk_dir).await?;
    recreate_dir(staging).await?;

    reporter.info(&format!("Resolving {} songs", songs.len()));
    let mut resolved: Vec<(&Song, String)> = Vec::with_capacity(songs.len());
    for (idx, song) in songs.iter().enumerate() {
        ctx.check_cancelled()?;
        match ctx
            .tools
            .resolver
            .resolve(song, &ctx.cancellation_token)
            .await
        {
            Ok(source) => resolved.push((song, source.url)),
            Err(ToolError::Cancelled) => return Err(JobError::cancelled()),
            Err(e) => {
                warn!("Job {}: cannot resolve '{}': {}", job.id, song.display_label(), e);
                reporter.item_failed(&song.display_label(), &e.to_string());
            }
        }
        reporter.scaled(0, RESOLVE_END, ((idx + 1) * 100 / songs.len()) as f32);
    }
    if resolved.is_empty() {
        return Err(JobError::new(
            JobErrorType::NoOutput,
            "No playable source found for any requested song",
        ));
    }

    let batch_file = staging.join(BATCH_FILE_NAME);
    let urls: Vec<&str> = resolved.iter().map(|(_, url)| url.as_str()).collect();
    tokio::fs::write(&batch_file, format!("{}\n", urls.join("\n"))).await?;

    reporter.info("Downloading");
    let mut tracker = BatchTracker::new(resolved.len());
    let mut on_progress = |update: ToolProgress| {
        tracker.update(&update);
        reporter.scaled(RESOLVE_END, DOWNLOAD_END, tracker.percentage() as f32);
    };
    let outcome = ctx
        .tools
        .extractor
        .download_batch(
            &batch_file,
            staging,
            format,
            &ctx.cancellation_token,
            &mut on_progress,
        )
        .await?;
    ctx.check_cancelled()?;
    for error in &outcome.errors {
        debug!("Job {}: batch item error: {}", job.id, error);
    }
    reporter.progress(DOWNLOAD_END);

    let mut files = list_candidate_files(staging).await?;
    if format.needs_transcode() {
        files = convert_all(ctx, staging, files, format).await?;
    }
    reporter.progress(CONVERT_END);
    if files.is_empty() {
        return Err(JobError::new(JobErrorType::NoOutput, "The batch produced no files"));
    }

    let targets: Vec<MatchTarget> = resolved
        .iter()
        .map(|(song, _)| MatchTarget::new(&song.title, song.artists.first()))
        .collect();
    let associations = associate_files(&files, &targets);

    let archive_path = ctx
        .folders
        .archives_dir(&job.user_id)
        .join(format!("{}.zip", job.id));
    let sources: Vec<PathBuf> = files.iter().map(|f| staging.join(f)).collect();
    let report = {
        let archive_path = archive_path.clone();
        let archive_reporter = reporter.clone();
        tokio::task::spawn_blocking(move || {
            build_archive(&sources, &archive_path, |p| {
                archive_reporter.scaled(CONVERT_END, ARCHIVE_END, p.percentage() as f32)
            })
        })
        .await
        .map_err(|e| JobError::new(JobErrorType::Archive, format!("Archive task failed: {}", e)))??
    };
    if report.added.is_empty() {
        return Err(JobError::new(
            JobErrorType::Archive,
            "No file could be added to the archive",
        ));
    }
    ArchiveManifest::from_report(&report, song_ids.to_vec()).write(&archive_path)?;
    for failed in &report.failed {
        warn!("Job {}: {:?} left out of archive: {}", job.id, failed.path, failed.reason);
    }

    // Late results of a cancelled job must not flip the flags on.
    ctx.check_cancelled()?;

    let archived = |name: &str| !report.failed.iter().any(|f| f.path == staging.join(name));
    let mut success_count = 0;
    for (idx, (song, _)) in resolved.iter().enumerate() {
        let Some(file) = associations[idx].as_deref().filter(|f| archived(f)) else {
            reporter.item_failed(&song.display_label(), "No downloaded file matched this song");
            continue;
        };
        let kept = bulk_dir.join(file);
        if let Err(e) = move_file(&staging.join(file), &kept).await {
            warn!("Job {}: cannot keep {:?}: {}", job.id, kept, e);
            reporter.item_failed(&song.display_label(), "The downloaded file could not be stored");
            continue;
        }
        match ctx.catalog_sync.mark(&song.id, true, true).await {
            Ok(()) => success_count += 1,
            Err(e) => {
                warn!("Job {}: cannot flag song {}: {}", job.id, song.id, e);
                reporter.item_failed(&song.display_label(), "The catalog could not be updated");
            }
        }
    }

    // Counted per requested song; archive entries that matched no song only
    // show up in `files`.
    let fail_count = song_ids.len().saturating_sub(success_count);
    let archive_name = archive_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    info!(
        "Job {}: archive {} with {} files, {} songs stored, {} failed",
        job.id,
        archive_name,
        report.added.len(),
        success_count,
        fail_count
    );
    Ok(JobResult {
        file_name: format!("{}/{}", super::folders::ARCHIVES_FOLDER, archive_name),
        files: report.added,
        success_count,
        fail_count,
    })
}

/// Transcodes every produced file not already in `format`. Files that fail
/// to convert are kept as they are.
async fn convert_all(
    ctx: &JobContext,
    staging: &Path,
    files: Vec<String>,
    format: AudioFormat,
) -> Result<Vec<String>, JobError> {
    let mut converted = Vec::with_capacity(files.len());
    for file in files {
        let path = staging.join(&file);
        if AudioFormat::from_path(&path) == Some(format) {
            converted.push(file);
            continue;
        }
        match ctx
            .tools
            .transcoder
            .transcode(&path, format, &ctx.cancellation_token)
            .await
        {
            Ok(output) => converted.push(
                output
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
                    .unwrap_or(file),
            ),
            Err(ToolError::Cancelled) => return Err(JobError::cancelled()),
            Err(e) => {
                warn!("Cannot convert {:?} to {}: {}", path, format, e);
                converted.push(file);
            }
        }
    }
    Ok(converted)
}
