//! Single-song job execution.
//!
//! resolve song -> pick folder -> resolve source -> extract into a staging
//! directory -> match the produced file -> transcode if needed -> move into
//! the target folder -> flag the song as downloaded and local.
//!
//! Any failure flags the song as neither downloaded nor local before the
//! error goes back to the worker.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::catalog::Song;
use crate::matcher::{find_match, list_candidate_files};
use crate::tools::{ExtractOutcome, ResolvedSource, ToolProgress};

use super::context::JobContext;
use super::folders::resolve_target_folder;
use super::models::{Job, JobError, JobErrorType, JobResult};
use super::progress_notifier::JobReporter;

// Job progress ranges per stage.
const RESOLVED: u8 = 5;
const DOWNLOAD_START: u8 = 10;
const DOWNLOAD_END: u8 = 85;
const MATCHED: u8 = 90;
const STORED: u8 = 95;

pub async fn run_single(
    ctx: &JobContext,
    job: &Job,
    song_id: &str,
    folder: Option<&str>,
    reporter: &JobReporter,
) -> Result<JobResult, JobError> {
    let staging = ctx.folders.staging_dir(&job.user_id, &job.id);
    let result = execute(ctx, job, song_id, folder, &staging, reporter).await;

    if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Cannot remove staging directory {:?}: {}", staging, e);
        }
    }

    if let Err(e) = &result {
        if e.error_type != JobErrorType::Cancelled && !ctx.is_cancelled() {
            if let Err(sync_err) = ctx.catalog_sync.mark(song_id, false, false).await {
                warn!("Cannot reset flags of song {}: {}", song_id, sync_err);
            }
        }
    }
    result
}

async fn execute(
    ctx: &JobContext,
    job: &Job,
    song_id: &str,
    folder: Option<&str>,
    staging: &Path,
    reporter: &JobReporter,
) -> Result<JobResult, JobError> {
    let song = ctx
        .catalog_store
        .get_song_by_id(song_id)?
        .ok_or_else(|| JobError::new(JobErrorType::NotFound, format!("Song {} not found", song_id)))?;
    let playlists = ctx
        .catalog_store
        .get_playlist_names_for_song(&job.user_id, song_id)?;
    let folder = resolve_target_folder(folder, &playlists, song.legacy_playlist.as_deref());
    let format = ctx.preferred_format(&job.user_id)?;
    debug!(
        "Job {}: song '{}' -> folder '{}' as {}",
        job.id,
        song.display_label(),
        folder,
        format
    );

    reporter.info("Resolving source");
    let source = ctx
        .tools
        .resolver
        .resolve(&song, &ctx.cancellation_token)
        .await?;
    ctx.check_cancelled()?;
    reporter.progress(RESOLVED);

    recreate_dir(staging).await?;
    reporter.progress(DOWNLOAD_START);
    let mut on_progress = |update: ToolProgress| {
        if let ToolProgress::Percent(percent) = update {
            reporter.scaled(DOWNLOAD_START, DOWNLOAD_END, percent);
        }
    };
    let outcome = ctx
        .tools
        .extractor
        .download(
            &source.url,
            staging,
            format,
            &ctx.cancellation_token,
            &mut on_progress,
        )
        .await?;
    ctx.check_cancelled()?;
    reporter.progress(DOWNLOAD_END);

    let matched = locate_output(staging, &song, &source, &outcome)
        .await
        .ok_or_else(|| {
            JobError::new(
                JobErrorType::NoOutput,
                format!("No file matching '{}' was produced", song.display_label()),
            )
        })?;
    reporter.progress(MATCHED);

    let mut produced = staging.join(&matched);
    if format.needs_transcode() && !has_extension(&produced, format.extension()) {
        reporter.info(&format!("Converting to {}", format.as_str().to_uppercase()));
        produced = ctx
            .tools
            .transcoder
            .transcode(&produced, format, &ctx.cancellation_token)
            .await?;
    }

    let file_name = produced
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| JobError::new(JobErrorType::NoOutput, "Produced file has no usable name"))?;
    let target_dir = ctx.folders.folder_dir(&job.user_id, &folder);
    tokio::fs::create_dir_all(&target_dir).await?;
    let destination = target_dir.join(&file_name);
    move_file(&produced, &destination).await?;
    reporter.progress(STORED);

    // Late results of a cancelled job must not flip the flags on.
    ctx.check_cancelled()?;
    ctx.catalog_sync.mark(song_id, true, true).await?;

    info!(
        "Job {}: stored '{}' as {:?}",
        job.id,
        song.display_label(),
        destination
    );
    Ok(JobResult {
        file_name: format!("{}/{}", folder, file_name),
        files: vec![file_name],
        success_count: 1,
        fail_count: 0,
    })
}

/// Finds the produced file: by song metadata, then by the resolved source
/// metadata, then by what the tool reported as finished.
async fn locate_output(
    staging: &Path,
    song: &Song,
    source: &ResolvedSource,
    outcome: &ExtractOutcome,
) -> Option<String> {
    if let Some(found) = find_match(staging, &song.title, song.artists.first()).await {
        return Some(found);
    }
    if let Some(found) = find_match(staging, &source.title, source.artist.as_deref()).await {
        return Some(found);
    }
    let reported: Vec<String> = outcome
        .files
        .iter()
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
        .collect();
    let present = list_candidate_files(staging).await.unwrap_or_default();
    reported.into_iter().find(|name| present.contains(name))
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

pub(crate) async fn recreate_dir(dir: &Path) -> Result<(), JobError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}

/// Renames `from` to `to`, copying when they sit on different file systems.
pub(crate) async fn move_file(from: &Path, to: &Path) -> Result<(), JobError> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await?;
    Ok(())
}
