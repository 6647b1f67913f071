use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for search operations
pub type SearchResult<T> = Result<T, SearchError>;

/// Errors that can end a search request
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("{0}")]
    PathRejected(PathRejection),
    #[error("{0}")]
    PatternRejected(PatternRejection),
    #[error("Search aborted: pattern timed out on {timed_out} of {attempted} files")]
    PatternAborted { timed_out: usize, attempted: usize },
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why a path failed the path guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRejection {
    OutsideAllowedRoots,
    NotFound,
    NotAFile,
    NotADirectory,
}

impl fmt::Display for PathRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::OutsideAllowedRoots => "Access denied: path is outside allowed directories",
            Self::NotFound => "Path not found",
            Self::NotAFile => "Path is not a file",
            Self::NotADirectory => "Path is not a directory",
        };
        f.write_str(msg)
    }
}

/// Why a search pattern failed the pattern guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternRejection {
    TooLong { max: usize },
    NestedQuantifiers,
    InvalidSyntax,
}

impl fmt::Display for PatternRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLong { max } => {
                write!(f, "Pattern too long (maximum {} characters)", max)
            }
            Self::NestedQuantifiers => f.write_str(
                "Pattern rejected: nested quantifiers can cause catastrophic backtracking",
            ),
            Self::InvalidSyntax => f.write_str("Invalid regex syntax"),
        }
    }
}

/// Coarse outcome class of a failed request, used by transports to pick a
/// response shape without looking at message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request; rejected before any I/O
    InvalidRequest,
    /// A path or pattern guard refused the request; no traversal occurred
    Rejected,
    /// The pattern timed out on a majority of attempted files
    Aborted,
    /// Anything unexpected; callers only ever see a generic message
    Internal,
}

impl SearchError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::PathRejected(_) | Self::PatternRejected(_) => ErrorKind::Rejected,
            Self::PatternAborted { .. } => ErrorKind::Aborted,
            Self::ConfigError(_) | Self::IoError(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<PathRejection> for SearchError {
    fn from(reason: PathRejection) -> Self {
        Self::PathRejected(reason)
    }
}

impl From<PatternRejection> for SearchError {
    fn from(reason: PatternRejection) -> Self {
        Self::PatternRejected(reason)
    }
}

/// Canonicalize the path and strip UNC prefixes so that
/// comparisons on Windows are consistent.
pub fn unify_path(original: &Path) -> std::io::Result<PathBuf> {
    let canonical = original.canonicalize()?;
    Ok(strip_unc_prefix(&canonical))
}

/// Strips the Windows UNC prefix (\\?\) from a path if present
fn strip_unc_prefix(p: &Path) -> PathBuf {
    let s = p.display().to_string();
    if let Some(stripped) = s.strip_prefix(r"\\?\") {
        PathBuf::from(stripped)
    } else {
        p.to_path_buf()
    }
}
