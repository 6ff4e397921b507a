//! Output folder layout under the media root.
//!
//! ```text
//! <media>/users/<user>/<playlist folder>/<song file>   single jobs
//! <media>/users/<user>/bulk/<song file>                bulk job files
//! <media>/users/<user>/archives/<job>.zip(.json)       bulk archives
//! <media>/users/<user>/.staging/<job>/                 in-flight tool output
//! ```

use std::path::{Path, PathBuf};

use tracing::{info, warn};
use walkdir::WalkDir;

pub const DEFAULT_FOLDER: &str = "default";
pub const BULK_FOLDER: &str = "bulk";
pub const ARCHIVES_FOLDER: &str = "archives";
const STAGING_FOLDER: &str = ".staging";
const MAX_FOLDER_NAME_CHARS: usize = 100;

/// Makes a user supplied name safe to use as a single path component.
///
/// Returns `None` when nothing usable is left.
pub fn sanitize_folder_name(name: &str) -> Option<String> {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            _ => c,
        })
        .collect();
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed
        .trim_start_matches('.')
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace())
        .trim();
    let truncated: String = trimmed.chars().take(MAX_FOLDER_NAME_CHARS).collect();
    let truncated = truncated.trim_end().to_string();
    if truncated.is_empty() || truncated.chars().all(|c| c == '_') {
        return None;
    }
    Some(truncated)
}

/// Picks the folder a single song is written to: the explicit name, then the
/// first playlist containing the song, then the legacy playlist field, then
/// [`DEFAULT_FOLDER`].
pub fn resolve_target_folder(
    explicit: Option<&str>,
    playlist_names: &[String],
    legacy_playlist: Option<&str>,
) -> String {
    explicit
        .and_then(sanitize_folder_name)
        .or_else(|| playlist_names.first().and_then(|n| sanitize_folder_name(n)))
        .or_else(|| legacy_playlist.and_then(sanitize_folder_name))
        .unwrap_or_else(|| DEFAULT_FOLDER.to_string())
}

/// Folder name of a user's tree.
///
/// Percent-encoded so that distinct ids never share a folder. A leading `.`
/// is encoded as well, which keeps `.`, `..` and hidden names out; the
/// encoder itself never emits `%2E`, nor a bare `%` as used for the empty id.
pub fn user_dir_name(user_id: &str) -> String {
    let encoded = urlencoding::encode(user_id);
    if encoded.is_empty() {
        return "%".to_string();
    }
    match encoded.strip_prefix('.') {
        Some(rest) => format!("%2E{}", rest),
        None => encoded.into_owned(),
    }
}

#[derive(Debug, Clone)]
pub struct UserFolders {
    media_root: PathBuf,
}

impl UserFolders {
    pub fn new(media_root: impl Into<PathBuf>) -> Self {
        Self {
            media_root: media_root.into(),
        }
    }

    pub fn user_dir(&self, user_id: &str) -> PathBuf {
        self.media_root.join("users").join(user_dir_name(user_id))
    }

    pub fn folder_dir(&self, user_id: &str, folder: &str) -> PathBuf {
        self.user_dir(user_id).join(folder)
    }

    pub fn bulk_dir(&self, user_id: &str) -> PathBuf {
        self.user_dir(user_id).join(BULK_FOLDER)
    }

    pub fn archives_dir(&self, user_id: &str) -> PathBuf {
        self.user_dir(user_id).join(ARCHIVES_FOLDER)
    }

    pub fn staging_dir(&self, user_id: &str, job_id: &str) -> PathBuf {
        let safe = sanitize_folder_name(job_id).unwrap_or_else(|| "_".to_string());
        self.user_dir(user_id).join(STAGING_FOLDER).join(safe)
    }

    /// Resolves a path stored on a job result. Rejects anything that would
    /// escape the user's directory.
    pub fn resolve_result_path(&self, user_id: &str, relative: &str) -> Option<PathBuf> {
        let relative = Path::new(relative);
        let safe = relative
            .components()
            .all(|c| matches!(c, std::path::Component::Normal(_)));
        if !safe || relative.as_os_str().is_empty() {
            return None;
        }
        Some(self.user_dir(user_id).join(relative))
    }

    /// Deletes staging directories left behind by jobs of a previous process.
    ///
    /// Must run before the worker starts. Returns the number of directories
    /// removed.
    pub fn clear_stale_staging(&self) -> usize {
        let users_dir = self.media_root.join("users");
        if !users_dir.is_dir() {
            return 0;
        }
        let stale: Vec<PathBuf> = WalkDir::new(&users_dir)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir() && entry.file_name() == STAGING_FOLDER)
            .map(|entry| entry.into_path())
            .collect();

        let mut removed = 0;
        for dir in stale {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Cannot remove stale staging directory {:?}: {}", dir, e),
            }
        }
        if removed > 0 {
            info!("Removed {} stale staging directories", removed);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_replaces_separators() {
        assert_eq!(
            sanitize_folder_name("Road/Trip: 2024").as_deref(),
            Some("Road_Trip_ 2024")
        );
        assert_eq!(sanitize_folder_name("  Chill   Vibes  ").as_deref(), Some("Chill Vibes"));
    }

    #[test]
    fn test_sanitize_rejects_traversal_and_empty() {
        assert_eq!(sanitize_folder_name(".."), None);
        assert_eq!(sanitize_folder_name("   "), None);
        assert_eq!(sanitize_folder_name("///"), None);
        assert_eq!(sanitize_folder_name(".hidden").as_deref(), Some("hidden"));
    }

    #[test]
    fn test_sanitize_truncates_long_names() {
        let long = "a".repeat(300);
        assert_eq!(sanitize_folder_name(&long).unwrap().chars().count(), 100);
    }

    #[test]
    fn test_sanitize_keeps_unicode() {
        assert_eq!(sanitize_folder_name("Música Ñ").as_deref(), Some("Música Ñ"));
    }

    #[test]
    fn test_resolve_target_folder_precedence() {
        let playlists = vec!["First List".to_string(), "Second".to_string()];
        assert_eq!(
            resolve_target_folder(Some("Chosen"), &playlists, Some("Legacy")),
            "Chosen"
        );
        assert_eq!(
            resolve_target_folder(None, &playlists, Some("Legacy")),
            "First List"
        );
        assert_eq!(resolve_target_folder(None, &[], Some("Legacy")), "Legacy");
        assert_eq!(resolve_target_folder(None, &[], None), DEFAULT_FOLDER);
        assert_eq!(resolve_target_folder(Some("../"), &[], None), DEFAULT_FOLDER);
    }

    #[test]
    fn test_user_layout() {
        let folders = UserFolders::new("/media");
        assert_eq!(folders.user_dir("alice"), PathBuf::from("/media/users/alice"));
        assert_eq!(folders.bulk_dir("alice"), PathBuf::from("/media/users/alice/bulk"));
        assert_eq!(
            folders.staging_dir("alice", "job-1"),
            PathBuf::from("/media/users/alice/.staging/job-1")
        );
        assert_eq!(folders.user_dir("../etc"), PathBuf::from("/media/users/%2E.%2Fetc"));
    }

    #[test]
    fn test_user_dirs_never_collide() {
        let ids = ["a/b", "a_b", "a%2Fb", ".", "..", "...", "_", "", "Zoë", "zo%C3%AB"];
        let names: Vec<String> = ids.iter().map(|id| user_dir_name(id)).collect();
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                assert_ne!(a, b, "{:?}", names);
            }
        }
        assert_eq!(user_dir_name("alice"), "alice");
        assert_eq!(user_dir_name("a/b"), "a%2Fb");
        assert_eq!(user_dir_name(".."), "%2E.");
        assert!(names
            .iter()
            .all(|n| !n.is_empty() && !n.starts_with('.') && !n.contains('/')));
    }

    #[test]
    fn test_resolve_result_path() {
        let folders = UserFolders::new("/media");
        assert_eq!(
            folders.resolve_result_path("bob", "archives/x.zip"),
            Some(PathBuf::from("/media/users/bob/archives/x.zip"))
        );
        assert_eq!(folders.resolve_result_path("bob", "../alice/x.zip"), None);
        assert_eq!(folders.resolve_result_path("bob", "/etc/passwd"), None);
        assert_eq!(folders.resolve_result_path("bob", ""), None);
    }

    #[test]
    fn test_clear_stale_staging_keeps_outputs() {
        let media = tempfile::TempDir::new().unwrap();
        let folders = UserFolders::new(media.path());
        std::fs::create_dir_all(folders.staging_dir("alice", "job-1")).unwrap();
        std::fs::create_dir_all(folders.staging_dir("bob", "job-2")).unwrap();
        let kept = folders.folder_dir("alice", DEFAULT_FOLDER).join("song.mp3");
        std::fs::create_dir_all(kept.parent().unwrap()).unwrap();
        std::fs::write(&kept, b"audio").unwrap();

        assert_eq!(folders.clear_stale_staging(), 2);
        assert!(!folders.user_dir("alice").join(STAGING_FOLDER).exists());
        assert!(kept.exists());
        assert_eq!(folders.clear_stale_staging(), 0);
    }

    #[test]
    fn test_clear_stale_staging_without_media() {
        let folders = UserFolders::new("/nonexistent/media");
        assert_eq!(folders.clear_stale_staging(), 0);
    }
}
