use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{ArchiveError, ArchiveReport};

/// Sidecar record written next to every archive as `<archive>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub archive: String,
    pub song_ids: Vec<String>,
    pub added: Vec<String>,
    pub failed: Vec<String>,
    pub created_at: i64,
}

impl ArchiveManifest {
    pub fn from_report(report: &ArchiveReport, song_ids: Vec<String>) -> Self {
        Self {
            archive: report
                .path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string(),
            song_ids,
            added: report.added.clone(),
            failed: report
                .failed
                .iter()
                .map(|f| {
                    f.path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or_default()
                        .to_string()
                })
                .collect(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn path_for(archive_path: &Path) -> PathBuf {
        let mut name = archive_path.as_os_str().to_owned();
        name.push(".json");
        PathBuf::from(name)
    }

    pub fn write(&self, archive_path: &Path) -> Result<PathBuf, ArchiveError> {
        let path = Self::path_for(archive_path);
        let json =
            serde_json::to_vec_pretty(self).map_err(|e| ArchiveError::Manifest(e.to_string()))?;
        std::fs::write(&path, json).map_err(|e| ArchiveError::Manifest(e.to_string()))?;
        Ok(path)
    }

    pub fn read(archive_path: &Path) -> Result<Self, ArchiveError> {
        let raw = std::fs::read(Self::path_for(archive_path))
            .map_err(|e| ArchiveError::Manifest(e.to_string()))?;
        serde_json::from_slice(&raw).map_err(|e| ArchiveError::Manifest(e.to_string()))
    }
}
