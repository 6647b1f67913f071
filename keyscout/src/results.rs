use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// One successfully scanned file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub occurrences: usize,
    pub size_bytes: u64,
    /// Extension including the leading dot, e.g. `.py`
    pub extension: String,
}

impl FileRecord {
    pub fn new(path: &Path, occurrences: usize, size_bytes: u64) -> Self {
        let extension = path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        Self {
            path: path.display().to_string(),
            occurrences,
            size_bytes,
            extension,
        }
    }
}

/// Why a file was left out of the results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    PermissionDenied,
    DecodeError,
    PatternTimeout,
    /// Any other I/O failure while reading the file
    ReadError,
}

/// A file that was attempted but not scanned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipRecord {
    pub path: String,
    pub reason: SkipReason,
}

impl SkipRecord {
    pub fn new(path: &Path, reason: SkipReason) -> Self {
        Self {
            path: path.display().to_string(),
            reason,
        }
    }
}

/// Everything one root's traversal produced
#[derive(Debug, Clone, Default)]
pub struct RootOutcome {
    pub records: Vec<FileRecord>,
    pub skipped: Vec<SkipRecord>,
    /// Directory entries the walker could not read
    pub walk_errors: usize,
}

impl RootOutcome {
    pub fn new() -> Self {
        Default::default()
    }

    /// Files that were read or attempted to be read
    pub fn files_attempted(&self) -> usize {
        self.records.len() + self.skipped.len()
    }

    /// Appends another root's outcome, keeping the first record seen for any
    /// path so overlapping roots are not double-counted.
    pub fn merge(&mut self, other: RootOutcome) {
        let mut seen: HashSet<String> = self
            .records
            .iter()
            .map(|r| r.path.clone())
            .chain(self.skipped.iter().map(|s| s.path.clone()))
            .collect();

        for record in other.records {
            if seen.insert(record.path.clone()) {
                self.records.push(record);
            }
        }
        for skip in other.skipped {
            if seen.insert(skip.path.clone()) {
                self.skipped.push(skip);
            }
        }
        self.walk_errors += other.walk_errors;
    }

    pub fn timed_out(&self) -> usize {
        self.skipped
            .iter()
            .filter(|s| s.reason == SkipReason::PatternTimeout)
            .count()
    }
}

/// Aggregate statistics over one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSummary {
    pub total_files_searched: usize,
    pub files_with_matches: usize,
    pub total_occurrences: usize,
    pub files_with_errors: usize,
    pub most_frequent_file: Option<String>,
    pub max_occurrences: usize,
    /// Percent of searched files with at least one match, two decimals
    pub match_percentage: f64,
    /// Mean occurrences over matching files, two decimals
    pub average_occurrences: f64,
}

impl SearchSummary {
    /// Computes the summary in one pass. Ties on `max_occurrences` keep the
    /// first file in `records` order.
    pub fn compute(records: &[FileRecord], error_count: usize) -> Self {
        let mut files_with_matches = 0;
        let mut total_occurrences = 0;
        let mut most_frequent_file = None;
        let mut max_occurrences = 0;

        for record in records {
            if record.occurrences == 0 {
                continue;
            }
            files_with_matches += 1;
            total_occurrences += record.occurrences;
            if record.occurrences > max_occurrences {
                max_occurrences = record.occurrences;
                most_frequent_file = Some(record.path.clone());
            }
        }

        let total_files_searched = records.len();
        let match_percentage = if total_files_searched > 0 {
            round2(files_with_matches as f64 * 100.0 / total_files_searched as f64)
        } else {
            0.0
        };
        let average_occurrences = if files_with_matches > 0 {
            round2(total_occurrences as f64 / files_with_matches as f64)
        } else {
            0.0
        };

        Self {
            total_files_searched,
            files_with_matches,
            total_occurrences,
            files_with_errors: error_count,
            most_frequent_file,
            max_occurrences,
            match_percentage,
            average_occurrences,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Request echo and per-request bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMetadata {
    pub keyword: String,
    pub roots_searched: Vec<String>,
    pub case_insensitive: bool,
    pub use_regex: bool,
    pub skipped_files: Vec<SkipRecord>,
    pub walk_errors: usize,
    pub elapsed_ms: u64,
}

/// A completed search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchReport {
    pub summary: SearchSummary,
    /// Matching files keyed by path
    pub files: BTreeMap<String, FileRecord>,
    pub metadata: SearchMetadata,
}
