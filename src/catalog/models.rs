//! Catalog data types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Streaming platform a song reference comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Spotify,
    Youtube,
    /// Arbitrary URL the extraction tool can handle directly.
    Url,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Spotify => "spotify",
            Platform::Youtube => "youtube",
            Platform::Url => "url",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "spotify" => Some(Platform::Spotify),
            "youtube" => Some(Platform::Youtube),
            "url" => Some(Platform::Url),
            _ => None,
        }
    }
}

/// Normalized list of artist names.
///
/// Stored either as a JSON array or, for older rows, as a comma separated
/// string. Both forms parse to the same list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtistList(Vec<String>);

impl ArtistList {
    pub fn new(artists: Vec<String>) -> Self {
        Self(
            artists
                .into_iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect(),
        )
    }

    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with('[') {
            if let Ok(list) = serde_json::from_str::<Vec<String>>(trimmed) {
                return Self::new(list);
            }
        }
        Self::new(trimmed.split(',').map(str::to_string).collect())
    }

    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Human readable form, e.g. "Artist A, Artist B".
    pub fn joined(&self) -> String {
        self.0.join(", ")
    }

    pub fn to_db_value(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }
}

/// A song reference owned by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub artists: ArtistList,
    pub platform: Platform,
    /// Platform page or arbitrary URL, when known.
    pub source_url: Option<String>,
    /// Raw playlist name from the pre-playlist-table era.
    pub legacy_playlist: Option<String>,
    /// A transcode was produced at least once.
    pub downloaded: bool,
    /// A matching file was present on disk at the last check.
    pub local: bool,
}

impl Song {
    pub fn new(id: &str, user_id: &str, title: &str, platform: Platform) -> Self {
        Self {
            id: id.to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            artists: ArtistList::default(),
            platform,
            source_url: None,
            legacy_playlist: None,
            downloaded: false,
            local: false,
        }
    }

    pub fn with_artists(mut self, artists: ArtistList) -> Self {
        self.artists = artists;
        self
    }

    pub fn with_source_url(mut self, url: &str) -> Self {
        self.source_url = Some(url.to_string());
        self
    }

    pub fn with_legacy_playlist(mut self, playlist: &str) -> Self {
        self.legacy_playlist = Some(playlist.to_string());
        self
    }

    /// "Artist - Title" label used in progress events and search queries.
    pub fn display_label(&self) -> String {
        match self.artists.first() {
            Some(artist) => format!("{} - {}", artist, self.title),
            None => self.title.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Song not found: {0}")]
    NotFound(String),
    /// Storage lock contention; the only retryable variant.
    #[error("Catalog busy: {0}")]
    Busy(String),
    #[error("Catalog storage error: {0}")]
    Storage(String),
    #[error("Invalid catalog data: {0}")]
    Invalid(String),
}

impl CatalogError {
    pub fn is_contention(&self) -> bool {
        matches!(self, CatalogError::Busy(_))
    }
}

impl From<rusqlite::Error> for CatalogError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                CatalogError::Busy(err.to_string())
            }
            _ => CatalogError::Storage(err.to_string()),
        }
    }
}
