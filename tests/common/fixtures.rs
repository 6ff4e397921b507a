//! Test catalog fixtures

use super::constants::*;
use tunefetch_server::catalog::{ArtistList, CatalogError, Platform, Song, SqliteCatalogStore};

fn song(id: &str, user: &str, artist: &str, title: &str) -> Song {
    Song::new(id, user, title, Platform::Youtube)
        .with_artists(ArtistList::parse(artist))
        .with_source_url(&format!("https://www.youtube.com/watch?v={}", id))
}

/// Inserts the songs and playlists the e2e tests refer to.
pub fn seed_catalog(catalog: &SqliteCatalogStore) -> Result<(), CatalogError> {
    catalog.upsert_song(&song(SONG_1_ID, TEST_USER, SONG_1_ARTIST, SONG_1_TITLE))?;
    catalog.upsert_song(&song(SONG_2_ID, TEST_USER, "Massive Attack", "Teardrop"))?;
    catalog.upsert_song(&song(SONG_3_ID, TEST_USER, "Portishead", "Glory Box"))?;
    catalog.upsert_song(&song(SONG_4_ID, TEST_USER, "Air", "La Femme d'Argent"))?;
    catalog.upsert_song(&song(SONG_5_ID, TEST_USER, "Moby", "Porcelain"))?;
    catalog.upsert_song(&song(UNICODE_SONG_ID, TEST_USER, "Björk", "Jóga"))?;
    catalog.upsert_song(&song(OTHER_SONG_ID, OTHER_USER, "Radiohead", "Airbag"))?;
    catalog.add_to_playlist(TEST_USER, PLAYLIST_NAME, &[SONG_1_ID])?;
    Ok(())
}
