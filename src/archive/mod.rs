//! Archive builder for bulk job results.

mod builder;
mod manifest;

use std::path::PathBuf;
use thiserror::Error;

pub use builder::{build_archive, ArchiveProgress, ArchiveReport, FailedEntry};
pub use manifest::ArchiveManifest;

/// Fatal archive failures. Per-file problems are reported in
/// [`ArchiveReport::failed`] instead.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Cannot create archive directory {path:?}: {source}")]
    CreateDestination {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot create archive file {path:?}: {source}")]
    CreateArchive {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to finish archive: {0}")]
    Finish(String),

    #[error("Failed to write archive manifest: {0}")]
    Manifest(String),
}
