use serde::{Deserialize, Serialize};

use crate::errors::{SearchError, SearchResult};

/// A keyword search over one or more root directories.
///
/// Field names follow the `keyword_search` tool arguments, so a request can
/// be deserialized straight from a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchRequest {
    /// Literal keyword, or a regex when `use_regex` is set
    pub keyword: String,

    /// Directories to search, each of which must lie in an allowed root
    pub root_paths: Vec<String>,

    #[serde(default)]
    pub case_insensitive: bool,

    #[serde(default)]
    pub use_regex: bool,

    /// Only files matching one of these globs are searched
    #[serde(default)]
    pub include_patterns: Vec<String>,

    /// Files and directories matching any of these globs are skipped
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

impl SearchRequest {
    pub fn new(keyword: impl Into<String>, root_paths: Vec<String>) -> Self {
        Self {
            keyword: keyword.into(),
            root_paths,
            case_insensitive: false,
            use_regex: false,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
        }
    }

    pub fn case_insensitive(mut self, yes: bool) -> Self {
        self.case_insensitive = yes;
        self
    }

    pub fn use_regex(mut self, yes: bool) -> Self {
        self.use_regex = yes;
        self
    }

    pub fn include(mut self, patterns: Vec<String>) -> Self {
        self.include_patterns = patterns;
        self
    }

    pub fn exclude(mut self, patterns: Vec<String>) -> Self {
        self.exclude_patterns = patterns;
        self
    }

    /// Shape checks that need no I/O
    pub fn validate(&self) -> SearchResult<()> {
        if self.keyword.trim().is_empty() {
            return Err(SearchError::invalid_request("keyword must not be empty"));
        }
        if self.root_paths.is_empty() {
            return Err(SearchError::invalid_request(
                "at least one root path is required",
            ));
        }
        if self.root_paths.iter().any(|p| p.trim().is_empty()) {
            return Err(SearchError::invalid_request("root paths must not be empty"));
        }
        Ok(())
    }
}
