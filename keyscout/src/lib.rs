pub mod config;
pub mod errors;
pub mod filters;
pub mod guard;
pub mod metrics;
pub mod request;
pub mod results;
pub mod search;

pub use config::{EncodingMode, EngineConfig};
pub use errors::{ErrorKind, PathRejection, PatternRejection, SearchError, SearchResult};
pub use guard::{AllowedRoots, PathGuard, PatternGuard};
pub use request::SearchRequest;
pub use results::{FileRecord, SearchReport, SearchSummary, SkipReason, SkipRecord};
pub use search::{SearchEngine, SearchOutcome};
