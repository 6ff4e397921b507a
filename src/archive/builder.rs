//! Streaming zip builder.
//!
//! Sources are copied into the archive one at a time through a reader, so a
//! file is never held in memory as a whole. Per-file failures are collected
//! in the report; only creating the destination and finishing the archive
//! can fail the build.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::ArchiveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveProgress {
    /// Source entries handled so far, including skipped and failed ones.
    pub processed: usize,
    pub total: usize,
}

impl ArchiveProgress {
    pub fn percentage(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.processed * 100) / self.total).min(100) as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntry {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ArchiveReport {
    pub path: PathBuf,
    /// Entry names written to the archive.
    pub added: Vec<String>,
    pub failed: Vec<FailedEntry>,
}

/// Returns a name not yet in `used`, appending " (n)" before the extension.
fn unique_entry_name(file_name: &str, used: &mut HashSet<String>) -> String {
    if used.insert(file_name.to_string()) {
        return file_name.to_string();
    }
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    let ext = path.extension().and_then(|e| e.to_str());
    let mut n = 2;
    loop {
        let candidate = match ext {
            Some(ext) => format!("{} ({}).{}", stem, n, ext),
            None => format!("{} ({})", stem, n),
        };
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

fn append_entry<W: Write + io::Seek>(
    zip: &mut ZipWriter<W>,
    source: &Path,
    entry_name: &str,
    options: SimpleFileOptions,
) -> Result<(), String> {
    let mut file = File::open(source).map_err(|e| format!("open failed: {}", e))?;
    zip.start_file(entry_name, options)
        .map_err(|e| format!("start entry failed: {}", e))?;
    if let Err(e) = io::copy(&mut file, zip) {
        if let Err(abort_err) = zip.abort_file() {
            warn!("Failed to abort entry {}: {}", entry_name, abort_err);
        }
        return Err(format!("copy failed: {}", e));
    }
    Ok(())
}

/// Writes `sources` into a zip archive at `destination`.
///
/// Directories are skipped silently. `on_progress` is called once per
/// source entry.
pub fn build_archive<F>(
    sources: &[PathBuf],
    destination: &Path,
    mut on_progress: F,
) -> Result<ArchiveReport, ArchiveError>
where
    F: FnMut(ArchiveProgress),
{
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|e| ArchiveError::CreateDestination {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let file = File::create(destination).map_err(|e| ArchiveError::CreateArchive {
        path: destination.to_path_buf(),
        source: e,
    })?;

    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    let total = sources.len();
    let mut used_names = HashSet::new();
    let mut added = Vec::new();
    let mut failed = Vec::new();

    for (idx, source) in sources.iter().enumerate() {
        match fs::metadata(source) {
            Ok(meta) if meta.is_dir() => {
                debug!("Skipping directory {:?}", source);
            }
            Ok(meta) if !meta.is_file() => {
                debug!("Skipping non-regular file {:?}", source);
            }
            Ok(_) => {
                let file_name = source
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("file");
                let entry_name = unique_entry_name(file_name, &mut used_names);
                match append_entry(&mut zip, source, &entry_name, options) {
                    Ok(()) => added.push(entry_name),
                    Err(reason) => {
                        used_names.remove(&entry_name);
                        warn!("Could not add {:?} to archive: {}", source, reason);
                        failed.push(FailedEntry {
                            path: source.clone(),
                            reason,
                        });
                    }
                }
            }
            Err(e) => {
                warn!("Could not add {:?} to archive: {}", source, e);
                failed.push(FailedEntry {
                    path: source.clone(),
                    reason: e.to_string(),
                });
            }
        }
        on_progress(ArchiveProgress {
            processed: idx + 1,
            total,
        });
    }

    let mut writer = zip.finish().map_err(|e| ArchiveError::Finish(e.to_string()))?;
    writer
        .flush()
        .map_err(|e| ArchiveError::Finish(e.to_string()))?;

    info!(
        "Archive {:?} written: {} added, {} failed",
        destination,
        added.len(),
        failed.len()
    );

    Ok(ArchiveReport {
        path: destination.to_path_buf(),
        added,
        failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn entry_names(archive: &Path) -> Vec<String> {
        let file = File::open(archive).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn test_valid_and_missing_sources() {
        let dir = TempDir::new().unwrap();
        let mut sources = vec![
            write_file(dir.path(), "one.mp3", b"one"),
            write_file(dir.path(), "two.mp3", b"two"),
            write_file(dir.path(), "three.mp3", b"three"),
        ];
        sources.insert(1, dir.path().join("missing-a.mp3"));
        sources.push(dir.path().join("missing-b.mp3"));

        let dest = dir.path().join("out").join("bundle.zip");
        let report = build_archive(&sources, &dest, |_| {}).unwrap();

        assert_eq!(report.added.len(), 3);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(entry_names(&dest), vec!["one.mp3", "two.mp3", "three.mp3"]);
    }

    #[test]
    fn test_contents_are_preserved() {
        let dir = TempDir::new().unwrap();
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let source = write_file(dir.path(), "big.flac", &payload);
        let dest = dir.path().join("bundle.zip");

        build_archive(&[source], &dest, |_| {}).unwrap();

        let mut zip = zip::ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        let mut entry = zip.by_name("big.flac").unwrap();
        let mut read_back = Vec::new();
        entry.read_to_end(&mut read_back).unwrap();
        assert_eq!(read_back, payload);
    }

    #[test]
    fn test_directories_are_skipped_silently() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("nested");
        fs::create_dir(&sub).unwrap();
        let file = write_file(dir.path(), "a.mp3", b"a");
        let dest = dir.path().join("bundle.zip");

        let report = build_archive(&[sub, file], &dest, |_| {}).unwrap();
        assert_eq!(report.added, vec!["a.mp3".to_string()]);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn test_duplicate_names_are_renamed() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("x")).unwrap();
        fs::create_dir(dir.path().join("y")).unwrap();
        let a = write_file(&dir.path().join("x"), "song.mp3", b"x");
        let b = write_file(&dir.path().join("y"), "song.mp3", b"y");
        let dest = dir.path().join("bundle.zip");

        let report = build_archive(&[a, b], &dest, |_| {}).unwrap();
        assert_eq!(report.added, vec!["song.mp3", "song (2).mp3"]);
    }

    #[test]
    fn test_progress_counts_entries() {
        let dir = TempDir::new().unwrap();
        let sources = vec![
            write_file(dir.path(), "a.mp3", b"a"),
            dir.path().join("missing.mp3"),
            write_file(dir.path(), "b.mp3", b"b"),
            write_file(dir.path(), "c.mp3", b"c"),
        ];
        let dest = dir.path().join("bundle.zip");

        let mut seen = Vec::new();
        build_archive(&sources, &dest, |p| seen.push(p.percentage())).unwrap();
        assert_eq!(seen, vec![25, 50, 75, 100]);
    }

    #[test]
    fn test_empty_source_list_still_writes_archive() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("empty.zip");
        let report = build_archive(&[], &dest, |_| {}).unwrap();
        assert!(report.added.is_empty());
        assert!(entry_names(&dest).is_empty());
    }

    #[test]
    fn test_uncreatable_destination_is_fatal() {
        let dir = TempDir::new().unwrap();
        let blocker = write_file(dir.path(), "blocker", b"not a dir");
        let dest = blocker.join("bundle.zip");

        let err = build_archive(&[], &dest, |_| {}).unwrap_err();
        assert!(matches!(err, ArchiveError::CreateDestination { .. }));
    }

    #[test]
    fn test_unique_entry_name_without_extension() {
        let mut used = HashSet::new();
        assert_eq!(unique_entry_name("README", &mut used), "README");
        assert_eq!(unique_entry_name("README", &mut used), "README (2)");
        assert_eq!(unique_entry_name("README", &mut used), "README (3)");
    }
}
