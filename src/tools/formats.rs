use serde::{Deserialize, Serialize};
use std::path::Path;

/// Audio codec a user can ask their downloads to be delivered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Flac,
    Opus,
    M4a,
    Wav,
    Alac,
    Aiff,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Flac => "flac",
            AudioFormat::Opus => "opus",
            AudioFormat::M4a => "m4a",
            AudioFormat::Wav => "wav",
            AudioFormat::Alac => "alac",
            AudioFormat::Aiff => "aiff",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp3" => Some(AudioFormat::Mp3),
            "flac" => Some(AudioFormat::Flac),
            "opus" => Some(AudioFormat::Opus),
            "m4a" | "aac" => Some(AudioFormat::M4a),
            "wav" => Some(AudioFormat::Wav),
            "alac" => Some(AudioFormat::Alac),
            "aiff" | "aif" => Some(AudioFormat::Aiff),
            _ => None,
        }
    }

    /// Format the extraction tool is asked to produce.
    ///
    /// AIFF is not produced natively, so it is extracted as FLAC and
    /// transcoded afterwards.
    pub fn extractor_format(&self) -> AudioFormat {
        match self {
            AudioFormat::Aiff => AudioFormat::Flac,
            other => *other,
        }
    }

    pub fn needs_transcode(&self) -> bool {
        self.extractor_format() != *self
    }

    /// File extension of the produced file.
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Alac => "m4a",
            other => other.as_str(),
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Flac => "audio/flac",
            AudioFormat::Opus => "audio/ogg",
            AudioFormat::M4a | AudioFormat::Alac => "audio/mp4",
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Aiff => "audio/aiff",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(AudioFormat::from_str)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        AudioFormat::Mp3
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Content type for a served file, falling back to a generic binary type.
pub fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("zip") => "application/zip",
        _ => AudioFormat::from_path(path)
            .map(|format| format.mime_type())
            .unwrap_or("application/octet-stream"),
    }
}
