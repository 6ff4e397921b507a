//! File matcher: finds which file in a directory corresponds to a song.

mod bulk;
mod strategies;

use std::path::Path;

use tracing::{debug, warn};

pub use bulk::{associate_files, MatchTarget};
pub use strategies::{best_match, keywords, normalize, Candidate, MatchQuery, STRATEGIES};

/// Extensions of partial or sidecar files the extraction tool leaves around.
const IGNORED_EXTENSIONS: &[&str] = &["part", "ytdl", "tmp", "temp", "json", "txt"];

fn is_candidate_name(file_name: &str) -> bool {
    if file_name.starts_with('.') {
        return false;
    }
    match Path::new(file_name).extension().and_then(|e| e.to_str()) {
        Some(ext) => !IGNORED_EXTENSIONS
            .iter()
            .any(|ignored| ext.eq_ignore_ascii_case(ignored)),
        None => true,
    }
}

/// Regular files in `dir` that could be finished audio output, sorted by name.
pub async fn list_candidate_files(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let file_type = match entry.file_type().await {
            Ok(t) => t,
            Err(_) => continue,
        };
        if !file_type.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if is_candidate_name(name) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Finds the file in `dir` that best matches the expected title and artist.
///
/// Never fails: unreadable directories and unusable titles yield `None`.
pub async fn find_match(dir: &Path, title: &str, artist: Option<&str>) -> Option<String> {
    let query = MatchQuery::new(title, artist)?;
    let names = match list_candidate_files(dir).await {
        Ok(names) => names,
        Err(e) => {
            warn!("Cannot scan {:?} for '{}': {}", dir, title, e);
            return None;
        }
    };
    let candidates: Vec<Candidate> = names.iter().map(|n| Candidate::new(n)).collect();
    let found = best_match(&candidates, &query).map(|idx| candidates[idx].file_name.clone());
    debug!("Match for '{}' in {:?}: {:?}", title, dir, found);
    found
}
