//! File retrieval: produced songs and bulk archives.
//!
//! Both routes honour single `Range` requests so players and download
//! managers can resume, and name the download through `Content-Disposition`
//! with an ASCII fallback and a percent-encoded UTF-8 `filename*`.

use std::path::{Path as FsPath, PathBuf};

use axum::{
    body::Body,
    extract::{FromRequestParts, Path, State},
    http::{header, request::Parts, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, BufReader, SeekFrom},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::download_queue::{resolve_target_folder, JobStatus, DEFAULT_FOLDER};
use crate::matcher::find_match;
use crate::server::errors::ApiError;
use crate::server::session::Session;
use crate::server::state::{GuardedJobQueue, ServerState};
use crate::tools::content_type_for;

const READ_BUFFER_SIZE: usize = 4096 * 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    start_inclusive: Option<u64>,
    end_inclusive: Option<u64>,
}

/// A byte range resolved against the actual resource length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: u64,
    pub end_inclusive: u64,
}

impl Span {
    pub fn byte_count(&self) -> u64 {
        self.end_inclusive - self.start + 1
    }
}

impl ByteRange {
    pub fn new(start_inclusive: Option<u64>, end_inclusive: Option<u64>) -> ByteRange {
        ByteRange {
            start_inclusive,
            end_inclusive,
        }
    }

    /// Parses a single-range `bytes=` header. Multiple ranges and malformed
    /// values yield `None`, which means the whole file is served.
    fn parse<S: AsRef<str>>(s: S) -> Option<ByteRange> {
        let v = s.as_ref().trim().strip_prefix("bytes=")?;
        if v.contains(',') {
            return None;
        }
        let (start, end) = v.split_once('-')?;
        let parse_bound = |b: &str| -> Result<Option<u64>, ()> {
            let b = b.trim();
            if b.is_empty() {
                Ok(None)
            } else {
                b.parse::<u64>().map(Some).map_err(|_| ())
            }
        };
        let range = ByteRange {
            start_inclusive: parse_bound(start).ok()?,
            end_inclusive: parse_bound(end).ok()?,
        };
        match range {
            ByteRange {
                start_inclusive: Some(s),
                end_inclusive: Some(e),
            } if s > e => None,
            _ => Some(range),
        }
    }

    /// `Ok(None)` serves the full body, `Err(())` is a 416.
    fn resolve(&self, length: u64) -> Result<Option<Span>, ()> {
        match (self.start_inclusive, self.end_inclusive) {
            (None, None) => Ok(None),
            (Some(start), end) => {
                if start >= length {
                    return Err(());
                }
                let last = length - 1;
                Ok(Some(Span {
                    start,
                    end_inclusive: end.map(|e| e.min(last)).unwrap_or(last),
                }))
            }
            // Suffix range: the last `n` bytes.
            (None, Some(n)) => {
                if n == 0 || length == 0 {
                    return Err(());
                }
                Ok(Some(Span {
                    start: length.saturating_sub(n),
                    end_inclusive: length - 1,
                }))
            }
        }
    }
}

/// The optional `Range` header of a request. Unparsable values are ignored.
pub struct RequestedRange(pub Option<ByteRange>);

impl<S: Send + Sync> FromRequestParts<S> for RequestedRange {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(RequestedRange(
            parts
                .headers
                .get(header::RANGE)
                .and_then(|x| x.to_str().ok())
                .and_then(ByteRange::parse),
        ))
    }
}

fn ascii_fallback(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| {
            if c == ' ' || (c.is_ascii_graphic() && c != '"' && c != '\\') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if fallback.trim().is_empty() {
        "download".to_string()
    } else {
        fallback
    }
}

/// `attachment; filename="<ascii>"; filename*=UTF-8''<percent-encoded>`
pub fn content_disposition(name: &str) -> String {
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii_fallback(name),
        urlencoding::encode(name)
    )
}

/// Streams `path`, or the requested part of it, as an attachment.
pub async fn serve_file(
    path: &FsPath,
    range: Option<ByteRange>,
    download_name: &str,
) -> Result<Response, ApiError> {
    let mut file = File::open(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ApiError::NotFound(format!("File {} is gone", download_name))
        } else {
            ApiError::Internal(format!("Cannot open {:?}: {}", path, e))
        }
    })?;
    let file_length = file
        .metadata()
        .await
        .map_err(|e| ApiError::Internal(format!("Cannot stat {:?}: {}", path, e)))?
        .len();

    let span = match range {
        None => None,
        Some(range) => range
            .resolve(file_length)
            .map_err(|_| ApiError::RangeNotSatisfiable(file_length))?,
    };
    let (status_code, served_length) = match span {
        None => (StatusCode::OK, file_length),
        Some(span) => {
            file.seek(SeekFrom::Start(span.start))
                .await
                .map_err(|e| ApiError::Internal(format!("Cannot seek {:?}: {}", path, e)))?;
            (StatusCode::PARTIAL_CONTENT, span.byte_count())
        }
    };
    debug!(
        "Serving {:?} ({} of {} bytes, range {:?})",
        path, served_length, file_length, span
    );

    let file_reader = BufReader::with_capacity(READ_BUFFER_SIZE, file.take(served_length));
    let stream = ReaderStream::with_capacity(file_reader, READ_BUFFER_SIZE);

    let mut builder = Response::builder()
        .status(status_code)
        .header(header::CONTENT_TYPE, content_type_for(path))
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, served_length)
        .header(header::CONTENT_DISPOSITION, content_disposition(download_name));
    if let Some(span) = span {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", span.start, span.end_inclusive, file_length),
        );
    }
    builder
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

fn download_name(path: &FsPath) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string())
}

/// GET /v1/jobs/{id}/file - The produced song or archive of a completed job
async fn job_file(
    session: Session,
    RequestedRange(range): RequestedRange,
    State(queue): State<GuardedJobQueue>,
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let job = queue.get_job(&session.user_id, &id)?;
    if job.status != JobStatus::Completed {
        return Err(ApiError::Conflict(format!(
            "Job {} is {}, no file to serve",
            id,
            job.status.as_str()
        )));
    }
    let relative = job
        .result
        .as_ref()
        .map(|r| r.file_name.as_str())
        .ok_or_else(|| ApiError::NotFound(format!("Job {} has no result file", id)))?;
    let path = state
        .folders
        .resolve_result_path(&session.user_id, relative)
        .ok_or_else(|| ApiError::NotFound(format!("Job {} has no usable result file", id)))?;
    serve_file(&path, range, &download_name(&path)).await
}

/// Directories a song's file may live in, most specific first.
fn song_search_dirs(state: &ServerState, user_id: &str, folder: &str) -> Vec<PathBuf> {
    let mut dirs = vec![state.folders.folder_dir(user_id, folder)];
    if folder != DEFAULT_FOLDER {
        dirs.push(state.folders.folder_dir(user_id, DEFAULT_FOLDER));
    }
    dirs.push(state.folders.bulk_dir(user_id));
    dirs
}

/// GET /v1/songs/{id}/file - The caller's local copy of a song
///
/// The `local` flag is only a hint: the file is looked up again and the flag
/// is corrected to what was found.
async fn song_file(
    session: Session,
    RequestedRange(range): RequestedRange,
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let song = state
        .catalog_store
        .get_song_by_id(&id)?
        .ok_or_else(|| ApiError::NotFound(format!("Song {} not found", id)))?;
    if song.user_id != session.user_id {
        return Err(ApiError::Forbidden(format!("Song {} belongs to another user", id)));
    }
    let playlists = state
        .catalog_store
        .get_playlist_names_for_song(&session.user_id, &id)?;
    let folder = resolve_target_folder(None, &playlists, song.legacy_playlist.as_deref());

    let mut found = None;
    for dir in song_search_dirs(&state, &session.user_id, &folder) {
        if let Some(name) = find_match(&dir, &song.title, song.artists.first()).await {
            found = Some(dir.join(name));
            break;
        }
    }

    let Some(path) = found else {
        if song.local {
            if let Err(e) = state.catalog_sync.set_local(&id, false).await {
                warn!("Cannot clear local flag of song {}: {}", id, e);
            }
        }
        return Err(ApiError::NotFound(format!(
            "No local file for '{}'",
            song.display_label()
        )));
    };
    if !song.local {
        if let Err(e) = state.catalog_sync.set_local(&id, true).await {
            warn!("Cannot set local flag of song {}: {}", id, e);
        }
    }
    serve_file(&path, range, &download_name(&path)).await
}

/// Mounted under `/v1/jobs`.
pub fn job_file_routes() -> Router<ServerState> {
    Router::new().route("/{id}/file", get(job_file))
}

/// Mounted under `/v1/songs`.
pub fn song_routes() -> Router<ServerState> {
    Router::new().route("/{id}/file", get(song_file))
}
