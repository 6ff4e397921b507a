//! Fuzzy file name matching strategies.
//!
//! Each strategy is a pure predicate over one candidate file. [`STRATEGIES`]
//! lists them in precedence order; a lower-precedence strategy is only
//! consulted when every higher one matched nothing.

use unicode_segmentation::UnicodeSegmentation;

/// Minimum share of title keywords a file name must contain.
pub const KEYWORD_COVERAGE_PERCENT: usize = 70;

/// Looser threshold used when pairing leftover bulk files.
pub const MAJORITY_COVERAGE_PERCENT: usize = 50;

/// Case-folds, turns punctuation into spaces and collapses whitespace.
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .flat_map(char::to_lowercase)
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Words longer than two characters from already normalized text.
pub fn keywords(normalized: &str) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    for word in normalized.unicode_words() {
        if word.chars().count() > 2 && !words.iter().any(|w| w == word) {
            words.push(word.to_string());
        }
    }
    words
}

fn file_stem(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => &file_name[..idx],
        _ => file_name,
    }
}

/// What we are looking for, preprocessed once per lookup.
#[derive(Debug, Clone)]
pub struct MatchQuery {
    pub title: String,
    pub normalized_title: String,
    pub keywords: Vec<String>,
    pub normalized_artist: Option<String>,
}

impl MatchQuery {
    /// Returns `None` when the title is empty or has no usable characters.
    pub fn new(title: &str, artist: Option<&str>) -> Option<Self> {
        let title = title.trim();
        let normalized_title = normalize(title);
        if normalized_title.is_empty() {
            return None;
        }
        let normalized_artist = artist.map(normalize).filter(|a| !a.is_empty());
        Some(Self {
            title: title.to_string(),
            keywords: keywords(&normalized_title),
            normalized_title,
            normalized_artist,
        })
    }
}

/// A file under consideration, preprocessed once per directory listing.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub file_name: String,
    pub normalized_stem: String,
}

impl Candidate {
    pub fn new(file_name: &str) -> Self {
        Self {
            file_name: file_name.to_string(),
            normalized_stem: normalize(file_stem(file_name)),
        }
    }

    fn keyword_hits(&self, keywords: &[String]) -> usize {
        keywords
            .iter()
            .filter(|k| self.normalized_stem.contains(k.as_str()))
            .count()
    }

    /// True if at least `percent`% of the keywords appear in the name.
    pub fn covers(&self, keywords: &[String], percent: usize) -> bool {
        if keywords.is_empty() {
            return false;
        }
        self.keyword_hits(keywords) * 100 >= keywords.len() * percent
    }

    /// True if strictly more than `percent`% of the keywords appear.
    pub fn exceeds(&self, keywords: &[String], percent: usize) -> bool {
        if keywords.is_empty() {
            return false;
        }
        self.keyword_hits(keywords) * 100 > keywords.len() * percent
    }
}

pub type Strategy = fn(&Candidate, &MatchQuery) -> bool;

pub fn exact_substring(candidate: &Candidate, query: &MatchQuery) -> bool {
    candidate.file_name.contains(&query.title)
}

pub fn normalized_substring(candidate: &Candidate, query: &MatchQuery) -> bool {
    candidate
        .normalized_stem
        .contains(query.normalized_title.as_str())
}

pub fn keyword_coverage(candidate: &Candidate, query: &MatchQuery) -> bool {
    candidate.covers(&query.keywords, KEYWORD_COVERAGE_PERCENT)
}

pub fn artist_assisted(candidate: &Candidate, query: &MatchQuery) -> bool {
    match &query.normalized_artist {
        Some(artist) => {
            candidate.normalized_stem.contains(artist.as_str())
                && candidate.keyword_hits(&query.keywords) > 0
        }
        None => false,
    }
}

pub const STRATEGIES: &[(&str, Strategy)] = &[
    ("exact", exact_substring),
    ("normalized", normalized_substring),
    ("keywords", keyword_coverage),
    ("artist", artist_assisted),
];

/// Index of the first candidate matched by the highest-precedence strategy.
pub fn best_match(candidates: &[Candidate], query: &MatchQuery) -> Option<usize> {
    STRATEGIES.iter().find_map(|(_, strategy)| {
        candidates
            .iter()
            .position(|candidate| strategy(candidate, query))
    })
}
