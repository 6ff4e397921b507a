//! Shared constants for end-to-end tests
//!
//! This module contains all constants used across the test suite.
//! When test data changes (users, catalog IDs, etc.), update only this file.

#![allow(dead_code)]

// ============================================================================
// Test Users
// ============================================================================

/// Owner of every seeded song except [`OTHER_SONG_ID`]
pub const TEST_USER: &str = "testuser";

/// A second user, owner of [`OTHER_SONG_ID`]
pub const OTHER_USER: &str = "otheruser";

// ============================================================================
// Test Catalog
// ============================================================================

/// "One More Time" by Daft Punk, in playlist [`PLAYLIST_NAME`]
pub const SONG_1_ID: &str = "song-1";
pub const SONG_1_ARTIST: &str = "Daft Punk";
pub const SONG_1_TITLE: &str = "One More Time";

/// "Teardrop" by Massive Attack
pub const SONG_2_ID: &str = "song-2";

/// "Glory Box" by Portishead
pub const SONG_3_ID: &str = "song-3";

/// "La Femme d'Argent" by Air
pub const SONG_4_ID: &str = "song-4";

/// "Porcelain" by Moby
pub const SONG_5_ID: &str = "song-5";

/// "Björk - Jóga", owned by [`TEST_USER`], no playlist
pub const UNICODE_SONG_ID: &str = "song-unicode";

/// Owned by [`OTHER_USER`]
pub const OTHER_SONG_ID: &str = "song-other";

/// Playlist containing [`SONG_1_ID`]
pub const PLAYLIST_NAME: &str = "Party Mix";

// ============================================================================
// Timeouts
// ============================================================================

/// Maximum time to wait for server to become ready (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Interval between server readiness checks (milliseconds)
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 10;

/// Request timeout for HTTP client (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Maximum time to wait for a job to reach a status (milliseconds)
pub const JOB_WAIT_TIMEOUT_MS: u64 = 10_000;
