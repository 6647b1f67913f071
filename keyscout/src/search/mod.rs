pub mod budget;
pub mod engine;
pub mod matcher;
pub mod processor;
pub mod traversal;

pub use budget::{count_within, CountError};
pub use engine::{SearchEngine, SearchOutcome};
pub use matcher::{compile_regex, MatchStrategy, OccurrenceCounter, PatternMatcher};
pub use processor::{FileOutcome, FileProcessor};
pub use traversal::TraversalScheduler;
