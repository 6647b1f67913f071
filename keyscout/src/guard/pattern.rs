use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::errors::PatternRejection;
use crate::search::matcher::compile_regex;

/// Longest regex pattern accepted, in characters
pub const MAX_PATTERN_LENGTH: usize = 500;

/// A group containing `+` or `*` that is itself followed by `+` or `*`
static NESTED_QUANTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\([^)]*[+*][^)]*\)[+*]").expect("nested quantifier detector is a valid regex")
});

/// Stateless pattern validation
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternGuard;

impl PatternGuard {
    /// Validates `pattern`. Literal patterns (`use_regex == false`) are
    /// always accepted since substring search has no backtracking.
    pub fn validate(pattern: &str, use_regex: bool) -> Result<(), PatternRejection> {
        if !use_regex {
            return Ok(());
        }

        if pattern.chars().count() > MAX_PATTERN_LENGTH {
            warn!(
                "Rejected regex pattern of {} characters",
                pattern.chars().count()
            );
            return Err(PatternRejection::TooLong {
                max: MAX_PATTERN_LENGTH,
            });
        }

        if has_nested_quantifier(pattern) {
            warn!("Rejected regex pattern with nested quantifiers: {}", pattern);
            return Err(PatternRejection::NestedQuantifiers);
        }

        if let Err(e) = compile_regex(pattern, false) {
            // The compiler diagnostic stays in the log
            warn!("Rejected regex pattern with invalid syntax: {}", e);
            return Err(PatternRejection::InvalidSyntax);
        }

        debug!("Regex pattern accepted");
        Ok(())
    }
}

/// True if the pattern contains a quantified group whose body is itself
/// quantified, e.g. `(a+)+` or `(?:.*)*`. Textual only: `{n,}` repeats and
/// doubly nested groups such as `((a+))+` are not caught.
pub fn has_nested_quantifier(pattern: &str) -> bool {
    NESTED_QUANTIFIER.is_match(pattern)
}
