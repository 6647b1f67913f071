use glob::Pattern;
use std::path::Path;

use crate::errors::{SearchError, SearchResult};

/// Extensions searched when the configuration does not override them
pub const DEFAULT_TEXT_EXTENSIONS: &[&str] = &[
    "py", "pyi", "txt", "md", "markdown", "rst", "json", "yaml", "yml", "toml", "ini", "cfg",
    "conf", "xml", "html", "htm", "css", "scss", "js", "jsx", "mjs", "ts", "tsx", "rs", "go",
    "java", "kt", "scala", "c", "h", "cc", "cpp", "hpp", "cs", "rb", "php", "swift", "lua", "pl",
    "r", "sh", "bash", "zsh", "sql", "csv", "log", "vue", "svelte",
];

/// Compiled include/exclude globs plus the text-type set for one request
#[derive(Debug, Clone)]
pub struct FileFilter {
    extensions: Vec<String>,
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl FileFilter {
    /// Compiles the globs; an invalid glob fails the request before any I/O.
    pub fn new(
        text_extensions: Option<&[String]>,
        include_patterns: &[String],
        exclude_patterns: &[String],
    ) -> SearchResult<Self> {
        let extensions = match text_extensions {
            Some(exts) => exts
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            None => DEFAULT_TEXT_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
        };

        Ok(Self {
            extensions,
            include: compile_globs(include_patterns, "include")?,
            exclude: compile_globs(exclude_patterns, "exclude")?,
        })
    }

    /// Checks if the file's extension is in the text-type set
    pub fn has_text_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }

    /// Checks if a directory below `root` should be pruned
    pub fn is_excluded_dir(&self, path: &Path, root: &Path) -> bool {
        path != root && matches_any(&self.exclude, path, root)
    }

    /// Determines if a regular file should be searched
    pub fn should_include_file(&self, path: &Path, root: &Path) -> bool {
        if !self.has_text_extension(path) {
            return false;
        }
        if !self.include.is_empty() && !matches_any(&self.include, path, root) {
            return false;
        }
        !matches_any(&self.exclude, path, root)
    }
}

fn compile_globs(patterns: &[String], kind: &str) -> SearchResult<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| {
                SearchError::invalid_request(format!("invalid {} pattern '{}': {}", kind, p, e))
            })
        })
        .collect()
}

fn matches_any(patterns: &[Pattern], path: &Path, root: &Path) -> bool {
    if patterns.is_empty() {
        return false;
    }

    let basename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let relative = path
        .strip_prefix(root)
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default();

    patterns.iter().any(|pattern| {
        pattern.matches(&basename) || (!relative.is_empty() && pattern.matches(&relative))
    })
}
