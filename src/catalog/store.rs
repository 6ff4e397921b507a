//! Catalog storage.
//!
//! The catalog owns song references, user playlists and per-user format
//! preferences. Jobs only read songs and flip the `downloaded`/`local` flags.

use super::models::{ArtistList, CatalogError, Platform, Song};
use super::schema::CATALOG_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::{open_in_memory, open_versioned};
use crate::tools::AudioFormat;
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Read/flag access to songs and playlist names.
pub trait CatalogStore: Send + Sync {
    fn get_song_by_id(&self, song_id: &str) -> Result<Option<Song>, CatalogError>;

    /// Songs found for the given ids, in request order. Unknown ids are skipped.
    fn get_songs_by_ids(&self, song_ids: &[String]) -> Result<Vec<Song>, CatalogError>;

    fn set_downloaded(&self, song_id: &str, downloaded: bool) -> Result<(), CatalogError>;

    fn set_local(&self, song_id: &str, local: bool) -> Result<(), CatalogError>;

    /// Names of the user's playlists containing the song, oldest playlist first.
    fn get_playlist_names_for_song(
        &self,
        user_id: &str,
        song_id: &str,
    ) -> Result<Vec<String>, CatalogError>;
}

pub trait FormatPreferences: Send + Sync {
    fn get_user_preferred_format(&self, user_id: &str) -> Result<Option<AudioFormat>, CatalogError>;
}

pub struct SqliteCatalogStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCatalogStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path, CATALOG_VERSIONED_SCHEMAS, "catalog")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = open_in_memory(CATALOG_VERSIONED_SCHEMAS)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_song(row: &rusqlite::Row) -> rusqlite::Result<Song> {
        let platform: String = row.get("platform")?;
        Ok(Song {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            title: row.get("title")?,
            artists: ArtistList::parse(&row.get::<_, String>("artists")?),
            platform: Platform::from_str(&platform).unwrap_or(Platform::Url),
            source_url: row.get("source_url")?,
            legacy_playlist: row.get("playlist")?,
            downloaded: row.get::<_, i32>("downloaded")? != 0,
            local: row.get::<_, i32>("local")? != 0,
        })
    }

    /// Inserts or replaces a song row.
    pub fn upsert_song(&self, song: &Song) -> Result<(), CatalogError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO songs (id, user_id, title, artists, platform, source_url, playlist, downloaded, local)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                title = excluded.title,
                artists = excluded.artists,
                platform = excluded.platform,
                source_url = excluded.source_url,
                playlist = excluded.playlist,
                downloaded = excluded.downloaded,
                local = excluded.local",
            params![
                song.id,
                song.user_id,
                song.title,
                song.artists.to_db_value(),
                song.platform.as_str(),
                song.source_url,
                song.legacy_playlist,
                song.downloaded as i32,
                song.local as i32,
            ],
        )?;
        Ok(())
    }

    /// Creates the playlist if needed and appends the given songs to it.
    pub fn add_to_playlist(
        &self,
        user_id: &str,
        name: &str,
        song_ids: &[&str],
    ) -> Result<(), CatalogError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO playlists (user_id, name) VALUES (?1, ?2)",
            params![user_id, name],
        )?;
        let playlist_id: i64 = tx.query_row(
            "SELECT id FROM playlists WHERE user_id = ?1 AND name = ?2",
            params![user_id, name],
            |row| row.get(0),
        )?;
        let mut position: i64 = tx.query_row(
            "SELECT COALESCE(MAX(position), -1) + 1 FROM playlist_songs WHERE playlist_id = ?1",
            params![playlist_id],
            |row| row.get(0),
        )?;
        for song_id in song_ids {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO playlist_songs (playlist_id, song_id, position) VALUES (?1, ?2, ?3)",
                params![playlist_id, song_id, position],
            )?;
            position += inserted as i64;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn set_user_preferred_format(
        &self,
        user_id: &str,
        format: AudioFormat,
    ) -> Result<(), CatalogError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO user_preferences (user_id, audio_format) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET audio_format = excluded.audio_format",
            params![user_id, format.as_str()],
        )?;
        Ok(())
    }

    fn set_flag(&self, column: &'static str, song_id: &str, value: bool) -> Result<(), CatalogError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            &format!("UPDATE songs SET {} = ?1 WHERE id = ?2", column),
            params![value as i32, song_id],
        )?;
        if updated == 0 {
            return Err(CatalogError::NotFound(song_id.to_string()));
        }
        Ok(())
    }
}

impl CatalogStore for SqliteCatalogStore {
    fn get_song_by_id(&self, song_id: &str) -> Result<Option<Song>, CatalogError> {
        let conn = self.conn.lock().unwrap();
        let song = conn
            .query_row(
                "SELECT * FROM songs WHERE id = ?1",
                params![song_id],
                Self::row_to_song,
            )
            .optional()?;
        Ok(song)
    }

    fn get_songs_by_ids(&self, song_ids: &[String]) -> Result<Vec<Song>, CatalogError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM songs WHERE id = ?1")?;
        let mut songs = Vec::with_capacity(song_ids.len());
        for song_id in song_ids {
            if let Some(song) = stmt
                .query_row(params![song_id], Self::row_to_song)
                .optional()?
            {
                songs.push(song);
            }
        }
        Ok(songs)
    }

    fn set_downloaded(&self, song_id: &str, downloaded: bool) -> Result<(), CatalogError> {
        self.set_flag("downloaded", song_id, downloaded)
    }

    fn set_local(&self, song_id: &str, local: bool) -> Result<(), CatalogError> {
        self.set_flag("local", song_id, local)
    }

    fn get_playlist_names_for_song(
        &self,
        user_id: &str,
        song_id: &str,
    ) -> Result<Vec<String>, CatalogError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT p.name FROM playlists p
             JOIN playlist_songs ps ON ps.playlist_id = p.id
             WHERE p.user_id = ?1 AND ps.song_id = ?2
             ORDER BY p.created_at ASC, p.id ASC",
        )?;
        let names = stmt
            .query_map(params![user_id, song_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }
}

impl FormatPreferences for SqliteCatalogStore {
    fn get_user_preferred_format(&self, user_id: &str) -> Result<Option<AudioFormat>, CatalogError> {
        let conn = self.conn.lock().unwrap();
        let raw: Option<String> = conn
            .query_row(
                "SELECT audio_format FROM user_preferences WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            None => Ok(None),
            Some(raw) => AudioFormat::from_str(&raw)
                .map(Some)
                .ok_or_else(|| CatalogError::Invalid(format!("unknown audio format '{}'", raw))),
        }
    }
}
