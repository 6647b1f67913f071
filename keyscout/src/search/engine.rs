use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::matcher::{OccurrenceCounter, PatternMatcher};
use super::processor::{FileProcessor, FileReader};
use super::traversal::TraversalScheduler;
use crate::config::EngineConfig;
use crate::errors::{ErrorKind, SearchError, SearchResult};
use crate::filters::FileFilter;
use crate::guard::{AllowedRoots, PathGuard, PatternGuard};
use crate::metrics::SearchMetrics;
use crate::request::SearchRequest;
use crate::results::{RootOutcome, SearchMetadata, SearchReport, SearchSummary};

/// Terminal state of one request
#[derive(Debug)]
pub enum SearchOutcome {
    Completed(Box<SearchReport>),
    /// Validation or a guard failed; nothing was read
    Rejected(SearchError),
    /// The pattern timed out on too many files; no partial results
    Aborted(SearchError),
    /// Unexpected failure
    Failed(SearchError),
}

impl From<SearchResult<SearchReport>> for SearchOutcome {
    fn from(result: SearchResult<SearchReport>) -> Self {
        match result {
            Ok(report) => SearchOutcome::Completed(Box::new(report)),
            Err(e) => match e.kind() {
                ErrorKind::InvalidRequest | ErrorKind::Rejected => SearchOutcome::Rejected(e),
                ErrorKind::Aborted => SearchOutcome::Aborted(e),
                ErrorKind::Internal => SearchOutcome::Failed(e),
            },
        }
    }
}

/// Stand-ins for the counter and the file reader
#[derive(Default)]
pub(crate) struct SearchOverrides {
    pub(crate) counter: Option<Arc<dyn OccurrenceCounter>>,
    pub(crate) reader: Option<FileReader>,
}

/// Entry point for keyword searches.
///
/// Built once per process. The engine owns the allow-list and a worker pool
/// of `thread_count` threads, and every request runs its roots and file
/// batches on that pool.
pub struct SearchEngine {
    config: EngineConfig,
    path_guard: PathGuard,
    pool: ThreadPool,
}

impl SearchEngine {
    pub fn new(config: EngineConfig, allowed: AllowedRoots) -> SearchResult<Self> {
        config.validate()?;
        if allowed.is_empty() {
            return Err(SearchError::config_error("no usable allowed roots"));
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.thread_count.get())
            .thread_name(|i| format!("keyscout-worker-{}", i))
            .build()
            .map_err(|e| SearchError::internal(format!("failed to build worker pool: {}", e)))?;

        info!(
            "Search engine ready: {} threads, {} allowed roots",
            config.thread_count,
            allowed.roots().len()
        );
        Ok(Self {
            config,
            path_guard: PathGuard::new(allowed),
            pool,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn path_guard(&self) -> &PathGuard {
        &self.path_guard
    }

    /// Runs a request and reports its terminal state
    pub fn run(&self, request: &SearchRequest) -> SearchOutcome {
        self.execute(request).into()
    }

    /// Runs a request: validation, guards, one traversal per root, then
    /// aggregation and the abort check over the merged skips.
    pub fn execute(&self, request: &SearchRequest) -> SearchResult<SearchReport> {
        self.execute_with(request, SearchOverrides::default())
    }

    /// Same as [`execute`](Self::execute) with the counter or the file reader
    /// swapped out; the pattern is still validated.
    pub(crate) fn execute_with(
        &self,
        request: &SearchRequest,
        overrides: SearchOverrides,
    ) -> SearchResult<SearchReport> {
        let started = Instant::now();
        info!(
            "Starting search over {} root(s) (regex: {}, case-insensitive: {})",
            request.root_paths.len(),
            request.use_regex,
            request.case_insensitive
        );

        // Validating
        request.validate()?;
        let filter = FileFilter::new(
            self.config.text_extensions.as_deref(),
            &request.include_patterns,
            &request.exclude_patterns,
        )?;

        // Guarding
        PatternGuard::validate(&request.keyword, request.use_regex)?;
        let roots = self.guard_roots(&request.root_paths)?;

        self.search_roots(request, &roots, filter, overrides, started)
    }

    /// Traverses guarded roots on the pool, then aggregates. A root whose
    /// walk fails is recorded as walk errors and its siblings carry on.
    pub(crate) fn search_roots(
        &self,
        request: &SearchRequest,
        roots: &[PathBuf],
        filter: FileFilter,
        overrides: SearchOverrides,
        started: Instant,
    ) -> SearchResult<SearchReport> {
        let counter = match overrides.counter {
            Some(counter) => counter,
            None => Arc::new(PatternMatcher::new(
                &request.keyword,
                request.use_regex,
                request.case_insensitive,
            )?),
        };

        // Traversing
        let metrics = SearchMetrics::new();
        let mut processor = FileProcessor::new(
            counter,
            self.config.encoding_mode,
            self.config.per_file_timeout,
        )
        .with_metrics(metrics.clone());
        if let Some(reader) = overrides.reader {
            processor = processor.with_reader(reader);
        }
        let scheduler = TraversalScheduler::new(Arc::new(filter), processor, self.config.batch_size);

        let outcomes: Vec<SearchResult<RootOutcome>> = self
            .pool
            .install(|| roots.par_iter().map(|root| scheduler.run(root)).collect());

        // Aggregating
        let mut merged = RootOutcome::new();
        for outcome in outcomes {
            merged.merge(outcome?);
        }
        metrics.log_stats();

        let attempted = merged.files_attempted();
        let timed_out = merged.timed_out();
        if attempted > 0 && timed_out as f64 / attempted as f64 > self.config.abort_ratio {
            warn!(
                "Aborting search: pattern timed out on {} of {} files",
                timed_out, attempted
            );
            return Err(SearchError::PatternAborted {
                timed_out,
                attempted,
            });
        }

        let report = self.build_report(request, roots, merged, started);
        info!(
            "Search complete. Found {} occurrences in {} of {} files",
            report.summary.total_occurrences,
            report.summary.files_with_matches,
            report.summary.total_files_searched
        );
        Ok(report)
    }

    /// Resolves every requested root through the path guard, dropping
    /// duplicates of the same canonical directory.
    fn guard_roots(&self, raw_roots: &[String]) -> SearchResult<Vec<PathBuf>> {
        let mut roots: Vec<PathBuf> = Vec::with_capacity(raw_roots.len());
        for raw in raw_roots {
            let root = self.path_guard.validate_exists(raw, false).map_err(|rejection| {
                warn!("Rejected root {:?}: {}", raw, rejection);
                SearchError::from(rejection)
            })?;
            if roots.contains(&root) {
                debug!("Dropping duplicate root {}", root.display());
                continue;
            }
            roots.push(root);
        }
        Ok(roots)
    }

    fn build_report(
        &self,
        request: &SearchRequest,
        roots: &[PathBuf],
        merged: RootOutcome,
        started: Instant,
    ) -> SearchReport {
        let error_count = merged.skipped.len() + merged.walk_errors;
        let summary = SearchSummary::compute(&merged.records, error_count);

        let files: BTreeMap<_, _> = merged
            .records
            .into_iter()
            .filter(|record| record.occurrences > 0)
            .map(|record| (record.path.clone(), record))
            .collect();

        SearchReport {
            summary,
            files,
            metadata: SearchMetadata {
                keyword: request.keyword.clone(),
                roots_searched: roots.iter().map(|r| r.display().to_string()).collect(),
                case_insensitive: request.case_insensitive,
                use_regex: request.use_regex,
                skipped_files: merged.skipped,
                walk_errors: merged.walk_errors,
                elapsed_ms: started.elapsed().as_millis() as u64,
            },
        }
    }
}
