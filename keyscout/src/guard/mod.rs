pub mod path;
pub mod pattern;

pub use path::{AllowedRoots, PathGuard};
pub use pattern::{PatternGuard, MAX_PATTERN_LENGTH};
