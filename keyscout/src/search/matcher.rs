use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::sync::Arc;
use tracing::debug;

use crate::errors::{PatternRejection, SearchResult};

/// Upper bound on the compiled program size of a single pattern
const REGEX_SIZE_LIMIT: usize = 10 * (1 << 20);
/// Cache is flushed once it holds this many compiled patterns
const MAX_CACHED_PATTERNS: usize = 256;

static REGEX_CACHE: Lazy<DashMap<(String, bool), Arc<Regex>>> = Lazy::new(DashMap::new);

/// Compiles a pattern with the engine and flags used at match time.
/// Compiled patterns are shared process-wide.
pub fn compile_regex(pattern: &str, case_insensitive: bool) -> Result<Arc<Regex>, regex::Error> {
    let key = (pattern.to_string(), case_insensitive);
    if let Some(entry) = REGEX_CACHE.get(&key) {
        return Ok(Arc::clone(entry.value()));
    }

    let regex = Arc::new(
        RegexBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()?,
    );

    if REGEX_CACHE.len() >= MAX_CACHED_PATTERNS {
        debug!("Flushing regex cache ({} entries)", REGEX_CACHE.len());
        REGEX_CACHE.clear();
    }
    REGEX_CACHE.insert(key, Arc::clone(&regex));
    Ok(regex)
}

/// Counts occurrences of something in a piece of text.
///
/// The traversal only depends on this trait, so it can run any counting
/// strategy under its time budget.
pub trait OccurrenceCounter: Send + Sync {
    fn count(&self, content: &str) -> usize;
}

/// Strategy for pattern matching
#[derive(Debug, Clone)]
pub enum MatchStrategy {
    /// Case-sensitive substring search
    Literal(String),
    /// Regex search; also used for case-insensitive literals
    Regex(Arc<Regex>),
}

/// Counts non-overlapping matches of a keyword or validated regex
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    strategy: MatchStrategy,
}

impl PatternMatcher {
    /// Literal keyword. Case-insensitive literals are compiled to an escaped
    /// regex with the case-insensitive flag so content is never lowercased.
    pub fn literal(keyword: &str, case_insensitive: bool) -> SearchResult<Self> {
        let strategy = if case_insensitive {
            let regex = compile_regex(&regex::escape(keyword), true)
                .map_err(|_| PatternRejection::InvalidSyntax)?;
            MatchStrategy::Regex(regex)
        } else {
            MatchStrategy::Literal(keyword.to_string())
        };
        Ok(Self { strategy })
    }

    /// Regex pattern. Callers are expected to have run the pattern guard.
    pub fn regex(pattern: &str, case_insensitive: bool) -> SearchResult<Self> {
        let regex =
            compile_regex(pattern, case_insensitive).map_err(|_| PatternRejection::InvalidSyntax)?;
        Ok(Self {
            strategy: MatchStrategy::Regex(regex),
        })
    }

    pub fn new(keyword: &str, use_regex: bool, case_insensitive: bool) -> SearchResult<Self> {
        if use_regex {
            Self::regex(keyword, case_insensitive)
        } else {
            Self::literal(keyword, case_insensitive)
        }
    }

    pub fn strategy(&self) -> &MatchStrategy {
        &self.strategy
    }
}

impl OccurrenceCounter for PatternMatcher {
    fn count(&self, content: &str) -> usize {
        match &self.strategy {
            MatchStrategy::Literal(keyword) => content.matches(keyword.as_str()).count(),
            MatchStrategy::Regex(regex) => regex.find_iter(content).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_case_sensitive() {
        let matcher = PatternMatcher::new("world", false, false).unwrap();
        assert!(matches!(matcher.strategy(), MatchStrategy::Literal(_)));
        assert_eq!(matcher.count("hello world, World, WORLD, world"), 2);
    }

    #[test]
    fn test_literal_counts_non_overlapping() {
        let matcher = PatternMatcher::new("aa", false, false).unwrap();
        assert_eq!(matcher.count("aaaa"), 2);
        assert_eq!(matcher.count("aaa"), 1);
    }

    #[test]
    fn test_literal_case_insensitive() {
        let matcher = PatternMatcher::new("world", false, true).unwrap();
        assert!(matches!(matcher.strategy(), MatchStrategy::Regex(_)));
        assert_eq!(matcher.count("hello world, World, WORLD"), 3);
    }

    #[test]
    fn test_literal_metacharacters_are_escaped() {
        let matcher = PatternMatcher::new("a.b(c)", false, true).unwrap();
        assert_eq!(matcher.count("a.b(c) axb(c) A.B(C)"), 2);
    }

    #[test]
    fn test_regex_counts_matches() {
        let matcher = PatternMatcher::new(r"\btest\w+", true, false).unwrap();
        assert_eq!(matcher.count("testing tests tested test"), 3);

        let matcher = PatternMatcher::new(r"todo|fixme", true, true).unwrap();
        assert_eq!(matcher.count("TODO: x\nFixMe: y\nnote"), 2);
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        assert!(PatternMatcher::new("[unclosed", true, false).is_err());
    }

    #[test]
    fn test_compile_cache_shares_instances() {
        let unique = format!(
            "cache_entry_{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        );
        let first = compile_regex(&unique, false).unwrap();
        let second = compile_regex(&unique, false).unwrap();
        let insensitive = compile_regex(&unique, true).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &insensitive));
    }
}
