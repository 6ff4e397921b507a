//! Line parser for the extraction tool's console output.

use std::path::PathBuf;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PERCENT_RE: Regex =
        Regex::new(r"^\[download\]\s+(\d+(?:\.\d+)?)%").expect("valid percent regex");
    static ref ITEM_RE: Regex =
        Regex::new(r"^\[download\] Downloading (?:item|video) (\d+) of (\d+)")
            .expect("valid item regex");
    static ref DESTINATION_RE: Regex =
        Regex::new(r"^\[download\] Destination: (.+)$").expect("valid destination regex");
    static ref EXTRACTED_RE: Regex =
        Regex::new(r"^\[ExtractAudio\] Destination: (.+)$").expect("valid extract regex");
    static ref ALREADY_RE: Regex =
        Regex::new(r"^\[download\] (.+) has already been downloaded").expect("valid already regex");
    static ref ERROR_RE: Regex = Regex::new(r"^ERROR: (.+)$").expect("valid error regex");
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolProgress {
    /// Download progress of the current item, 0-100.
    Percent(f32),
    /// 1-based position of the item being processed in a batch.
    ItemIndex { current: usize, total: usize },
    /// Raw media file being downloaded.
    Destination(PathBuf),
    /// Final audio file written by the post-processor. Marks an item done.
    ExtractedAudio(PathBuf),
    /// Item skipped because its output already exists. Marks an item done.
    AlreadyDownloaded(PathBuf),
    Error(String),
}

impl ToolProgress {
    pub fn completed_file(&self) -> Option<&PathBuf> {
        match self {
            ToolProgress::ExtractedAudio(path) | ToolProgress::AlreadyDownloaded(path) => Some(path),
            _ => None,
        }
    }
}

pub fn parse_line(line: &str) -> Option<ToolProgress> {
    let line = line.trim_end();

    if let Some(caps) = PERCENT_RE.captures(line) {
        return caps[1].parse().ok().map(ToolProgress::Percent);
    }
    if let Some(caps) = ITEM_RE.captures(line) {
        let current = caps[1].parse().ok()?;
        let total = caps[2].parse().ok()?;
        return Some(ToolProgress::ItemIndex { current, total });
    }
    if let Some(caps) = DESTINATION_RE.captures(line) {
        return Some(ToolProgress::Destination(PathBuf::from(caps[1].trim())));
    }
    if let Some(caps) = EXTRACTED_RE.captures(line) {
        return Some(ToolProgress::ExtractedAudio(PathBuf::from(caps[1].trim())));
    }
    if let Some(caps) = ALREADY_RE.captures(line) {
        return Some(ToolProgress::AlreadyDownloaded(PathBuf::from(caps[1].trim())));
    }
    if let Some(caps) = ERROR_RE.captures(line) {
        return Some(ToolProgress::Error(caps[1].trim().to_string()));
    }
    None
}

/// Folds a stream of [`ToolProgress`] updates into overall batch progress.
#[derive(Debug, Default)]
pub struct BatchTracker {
    total: usize,
    current: usize,
    item_percent: f32,
    completed: Vec<PathBuf>,
    errors: Vec<String>,
}

impl BatchTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            current: 1,
            ..Default::default()
        }
    }

    pub fn update(&mut self, progress: &ToolProgress) {
        match progress {
            ToolProgress::Percent(p) => self.item_percent = p.clamp(0.0, 100.0),
            ToolProgress::ItemIndex { current, total } => {
                self.current = *current;
                if *total > 0 {
                    self.total = *total;
                }
                self.item_percent = 0.0;
            }
            ToolProgress::ExtractedAudio(path) | ToolProgress::AlreadyDownloaded(path) => {
                if !self.completed.contains(path) {
                    self.completed.push(path.clone());
                }
                self.item_percent = 0.0;
            }
            ToolProgress::Error(message) => self.errors.push(message.clone()),
            ToolProgress::Destination(_) => {}
        }
    }

    /// Overall batch completion, 0-100.
    pub fn percentage(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        // Batch files report no item index, so completions count as well.
        let done_items = self
            .current
            .saturating_sub(1)
            .max(self.completed.len())
            .min(self.total);
        let in_flight = if done_items < self.total {
            self.item_percent / 100.0
        } else {
            0.0
        };
        let overall = (done_items as f32 + in_flight) / self.total as f32;
        (overall * 100.0).clamp(0.0, 100.0) as u8
    }

    pub fn completed(&self) -> &[PathBuf] {
        &self.completed
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}
