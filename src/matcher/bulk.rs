//! Pairing of a bulk job's output files with the songs that were requested.

use super::strategies::{Candidate, MatchQuery, MAJORITY_COVERAGE_PERCENT, STRATEGIES};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchTarget {
    pub title: String,
    pub artist: Option<String>,
}

impl MatchTarget {
    pub fn new(title: &str, artist: Option<&str>) -> Self {
        Self {
            title: title.to_string(),
            artist: artist.map(str::to_string),
        }
    }
}

/// Assigns each file to at most one target.
///
/// The result is aligned with `targets`. Passes, in order:
/// 1. one round per strategy, in precedence order, over every target still
///    unassigned, so a weak match for one song never takes a file that a
///    stronger strategy pairs with another,
/// 2. majority keyword coverage over the files still unclaimed,
/// 3. if exactly one file and one target remain, they are paired.
pub fn associate_files(files: &[String], targets: &[MatchTarget]) -> Vec<Option<String>> {
    let mut remaining: Vec<Candidate> = files.iter().map(|f| Candidate::new(f)).collect();
    let queries: Vec<Option<MatchQuery>> = targets
        .iter()
        .map(|t| MatchQuery::new(&t.title, t.artist.as_deref()))
        .collect();
    let mut assigned: Vec<Option<String>> = vec![None; targets.len()];

    for (_, strategy) in STRATEGIES {
        for (slot, query) in assigned.iter_mut().zip(queries.iter()) {
            if slot.is_some() {
                continue;
            }
            let Some(query) = query else { continue };
            if let Some(idx) = remaining.iter().position(|c| strategy(c, query)) {
                *slot = Some(remaining.remove(idx).file_name);
            }
        }
    }

    for (slot, query) in assigned.iter_mut().zip(queries.iter()) {
        if slot.is_some() {
            continue;
        }
        let Some(query) = query else { continue };
        if let Some(idx) = remaining
            .iter()
            .position(|c| c.exceeds(&query.keywords, MAJORITY_COVERAGE_PERCENT))
        {
            *slot = Some(remaining.remove(idx).file_name);
        }
    }

    let unassigned: Vec<usize> = assigned
        .iter()
        .enumerate()
        .filter(|(_, slot)| slot.is_none())
        .map(|(idx, _)| idx)
        .collect();
    if unassigned.len() == 1 && remaining.len() == 1 {
        assigned[unassigned[0]] = remaining.pop().map(|c| c.file_name);
    }

    assigned
}
