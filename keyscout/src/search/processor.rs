use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

use super::budget::{count_within, CountError};
use super::matcher::OccurrenceCounter;
use crate::config::EncodingMode;
use crate::errors::{SearchError, SearchResult};
use crate::metrics::SearchMetrics;
use crate::results::{FileRecord, SkipReason, SkipRecord};

const BUFFER_CAPACITY: usize = 65536;

/// What happened to one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Scanned(FileRecord),
    Skipped(SkipRecord),
}

/// Decodes file content, or `None` if the encoding mode refuses it
fn decode_bytes(bytes: Vec<u8>, path: &Path, mode: EncodingMode) -> Option<(String, bool)> {
    match String::from_utf8(bytes) {
        Ok(content) => Some((content, false)),
        Err(e) => match mode {
            EncodingMode::FailFast => None,
            EncodingMode::Lossy => {
                let bytes = e.into_bytes();
                let content = match String::from_utf8_lossy(&bytes) {
                    Cow::Owned(replaced) => replaced,
                    Cow::Borrowed(valid) => valid.to_owned(),
                };
                trace!("Invalid UTF-8 replaced in file: {}", path.display());
                Some((content, true))
            }
        },
    }
}

/// Loads a file's bytes
pub(crate) type FileReader = fn(&Path) -> io::Result<Vec<u8>>;

fn read_file(path: &Path) -> io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let capacity = file.metadata().map(|m| m.len() as usize).unwrap_or(0);
    let mut reader = BufReader::with_capacity(BUFFER_CAPACITY, file);
    let mut bytes = Vec::with_capacity(capacity);
    reader.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Reads one file and counts occurrences under the per-file time budget.
///
/// Unreadable, undecodable and timed-out files come back as
/// [`FileOutcome::Skipped`]; only a crashed counter is an error.
#[derive(Clone)]
pub struct FileProcessor {
    counter: Arc<dyn OccurrenceCounter>,
    metrics: SearchMetrics,
    encoding_mode: EncodingMode,
    timeout: Duration,
    reader: FileReader,
}

impl FileProcessor {
    pub fn new(
        counter: Arc<dyn OccurrenceCounter>,
        encoding_mode: EncodingMode,
        timeout: Duration,
    ) -> Self {
        Self {
            counter,
            metrics: SearchMetrics::new(),
            encoding_mode,
            timeout,
            reader: read_file,
        }
    }

    pub(crate) fn with_reader(mut self, reader: FileReader) -> Self {
        self.reader = reader;
        self
    }

    /// Shares an existing set of counters instead of starting fresh ones
    pub fn with_metrics(mut self, metrics: SearchMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &SearchMetrics {
        &self.metrics
    }

    pub fn process_file(&self, path: &Path) -> SearchResult<FileOutcome> {
        let bytes = match (self.reader)(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                let reason = match e.kind() {
                    io::ErrorKind::PermissionDenied => SkipReason::PermissionDenied,
                    _ => SkipReason::ReadError,
                };
                warn!("Skipping {}: {}", path.display(), e);
                return Ok(self.skip(path, reason));
            }
        };
        let size_bytes = bytes.len() as u64;

        let content = match decode_bytes(bytes, path, self.encoding_mode) {
            Some((content, lossy)) => {
                if lossy {
                    self.metrics.record_lossy_decode();
                }
                content
            }
            None => {
                warn!("Skipping {}: invalid UTF-8", path.display());
                return Ok(self.skip(path, SkipReason::DecodeError));
            }
        };

        match count_within(Arc::clone(&self.counter), Arc::from(content), self.timeout) {
            Ok(occurrences) => {
                trace!("{}: {} occurrences", path.display(), occurrences);
                self.metrics.record_scanned(size_bytes);
                Ok(FileOutcome::Scanned(FileRecord::new(
                    path,
                    occurrences,
                    size_bytes,
                )))
            }
            Err(CountError::TimedOut) => {
                warn!(
                    "Pattern timed out after {:?} on {}",
                    self.timeout,
                    path.display()
                );
                Ok(self.skip(path, SkipReason::PatternTimeout))
            }
            Err(CountError::Unavailable) => {
                warn!("No counting thread for {}, skipping", path.display());
                Ok(self.skip(path, SkipReason::PatternTimeout))
            }
            Err(CountError::Panicked) => Err(SearchError::internal(format!(
                "occurrence counter crashed on {}",
                path.display()
            ))),
        }
    }

    fn skip(&self, path: &Path, reason: SkipReason) -> FileOutcome {
        self.metrics.record_skip(reason);
        FileOutcome::Skipped(SkipRecord::new(path, reason))
    }
}

impl std::fmt::Debug for FileProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileProcessor")
            .field("encoding_mode", &self.encoding_mode)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
