use ignore::WalkBuilder;
use rayon::prelude::*;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use super::processor::{FileOutcome, FileProcessor};
use crate::errors::SearchResult;
use crate::filters::FileFilter;
use crate::results::RootOutcome;

/// Walks one root and processes its files in bounded batches.
///
/// One scheduler run owns its [`RootOutcome`]: files in a batch are processed
/// on the pool in parallel, but their outcomes are folded into the
/// accumulator by the run's own thread, in walk order.
#[derive(Debug, Clone)]
pub struct TraversalScheduler {
    filter: Arc<FileFilter>,
    processor: FileProcessor,
    batch_size: NonZeroUsize,
}

impl TraversalScheduler {
    pub fn new(filter: Arc<FileFilter>, processor: FileProcessor, batch_size: NonZeroUsize) -> Self {
        Self {
            filter,
            processor,
            batch_size,
        }
    }

    /// Searches every eligible file under `root`.
    ///
    /// Unreadable directories count as walk errors and the walk goes on. The
    /// only error is a crashed counter.
    pub fn run(&self, root: &Path) -> SearchResult<RootOutcome> {
        debug!("Walking {}", root.display());

        let mut outcome = RootOutcome::new();
        let mut batch: Vec<PathBuf> = Vec::with_capacity(self.batch_size.get());

        for entry in self.walker(root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Walk error under {}: {}", root.display(), e);
                    outcome.walk_errors += 1;
                    continue;
                }
            };

            // Symlinks are reported as such and never followed
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            if !self.filter.should_include_file(entry.path(), root) {
                continue;
            }

            batch.push(entry.into_path());
            if batch.len() == self.batch_size.get() {
                self.process_batch(&mut batch, &mut outcome)?;
            }
        }
        if !batch.is_empty() {
            self.process_batch(&mut batch, &mut outcome)?;
        }

        debug!(
            "Finished {}: {} scanned, {} skipped, {} walk errors",
            root.display(),
            outcome.records.len(),
            outcome.skipped.len(),
            outcome.walk_errors
        );
        Ok(outcome)
    }

    fn walker(&self, root: &Path) -> ignore::Walk {
        let filter = Arc::clone(&self.filter);
        let prune_root = root.to_path_buf();

        WalkBuilder::new(root)
            .standard_filters(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
                !(is_dir && filter.is_excluded_dir(entry.path(), &prune_root))
            })
            .build()
    }

    fn process_batch(&self, batch: &mut Vec<PathBuf>, outcome: &mut RootOutcome) -> SearchResult<()> {
        debug!("Processing batch of {} files", batch.len());

        let results: Vec<SearchResult<FileOutcome>> = batch
            .par_iter()
            .map(|path| self.processor.process_file(path))
            .collect();
        batch.clear();

        for result in results {
            match result? {
                FileOutcome::Scanned(record) => outcome.records.push(record),
                FileOutcome::Skipped(skip) => outcome.skipped.push(skip),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncodingMode;
    use crate::results::SkipReason;
    use crate::search::matcher::PatternMatcher;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    fn scheduler(
        include: &[&str],
        exclude: &[&str],
        mode: EncodingMode,
        batch_size: usize,
    ) -> TraversalScheduler {
        let include: Vec<String> = include.iter().map(|s| s.to_string()).collect();
        let exclude: Vec<String> = exclude.iter().map(|s| s.to_string()).collect();
        let filter = FileFilter::new(None, &include, &exclude).unwrap();
        let matcher = PatternMatcher::new("world", false, false).unwrap();
        let processor = FileProcessor::new(Arc::new(matcher), mode, Duration::from_secs(5));
        TraversalScheduler::new(
            Arc::new(filter),
            processor,
            NonZeroUsize::new(batch_size).unwrap(),
        )
    }

    #[test]
    fn test_walks_nested_text_files() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("top.txt"), "world").unwrap();
        fs::write(dir.path().join("a/mid.py"), "world world").unwrap();
        fs::write(dir.path().join("a/b/deep.md"), "nothing here").unwrap();
        fs::write(dir.path().join("a/b/image.png"), "world").unwrap();

        let outcome = scheduler(&[], &[], EncodingMode::Lossy, 50)
            .run(dir.path())
            .unwrap();

        assert_eq!(outcome.records.len(), 3);
        assert_eq!(outcome.records.iter().map(|r| r.occurrences).sum::<usize>(), 3);
        assert!(outcome.skipped.is_empty());
        assert_eq!(outcome.walk_errors, 0);
    }

    #[test]
    fn test_batches_smaller_than_file_count() {
        let dir = tempdir().unwrap();
        for i in 0..7 {
            fs::write(dir.path().join(format!("f{}.txt", i)), "world").unwrap();
        }

        let outcome = scheduler(&[], &[], EncodingMode::Lossy, 3)
            .run(dir.path())
            .unwrap();
        assert_eq!(outcome.records.len(), 7);

        // Sorted walk, folded in order
        let names: Vec<_> = outcome
            .records
            .iter()
            .map(|r| Path::new(&r.path).file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_excluded_directories_are_pruned() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("node_modules/pkg/index.js"), "world").unwrap();
        fs::write(dir.path().join("src/main.js"), "world").unwrap();

        let outcome = scheduler(&[], &["node_modules"], EncodingMode::Lossy, 50)
            .run(dir.path())
            .unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.records[0].path.ends_with("main.js"));
    }

    #[test]
    fn test_include_patterns_restrict_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("notes.md"), "world").unwrap();
        fs::write(dir.path().join("notes.txt"), "world").unwrap();

        let outcome = scheduler(&["*.md"], &[], EncodingMode::Lossy, 50)
            .run(dir.path())
            .unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.records[0].path.ends_with("notes.md"));
    }

    #[test]
    fn test_skips_do_not_stop_the_walk() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "world").unwrap();
        fs::write(dir.path().join("b.txt"), b"\xff\xfe world").unwrap();
        fs::write(dir.path().join("c.txt"), "world").unwrap();

        let outcome = scheduler(&[], &[], EncodingMode::FailFast, 50)
            .run(dir.path())
            .unwrap();
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].reason, SkipReason::DecodeError);
        assert_eq!(outcome.files_attempted(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_followed() {
        let outside = tempdir().unwrap();
        fs::write(outside.path().join("secret.txt"), "world").unwrap();

        let dir = tempdir().unwrap();
        fs::write(dir.path().join("real.txt"), "world").unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), dir.path().join("link.txt"))
            .unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("linked_dir")).unwrap();

        let outcome = scheduler(&[], &[], EncodingMode::Lossy, 50)
            .run(dir.path())
            .unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.records[0].path.ends_with("real.txt"));
    }

    #[test]
    fn test_missing_root_is_a_walk_error() {
        let dir = tempdir().unwrap();
        let outcome = scheduler(&[], &[], EncodingMode::Lossy, 50)
            .run(&dir.path().join("gone"))
            .unwrap();
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.walk_errors, 1);
    }
}
