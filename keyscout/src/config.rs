use config::{Config as ConfigBuilder, ConfigError, File};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::ffi::OsStr;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::errors::{SearchError, SearchResult};

/// Environment variable holding a platform path-list of allowed roots
/// (`:`-separated on Unix, `;`-separated on Windows).
pub const ALLOWED_ROOTS_ENV: &str = "KEYSCOUT_ALLOWED_ROOTS";

/// How to handle invalid UTF-8 sequences in file content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingMode {
    /// Replace malformed sequences with U+FFFD and keep searching
    #[default]
    Lossy,
    /// Skip the file with a `decode_error` skip record
    FailFast,
}

/// Process-wide engine configuration.
///
/// Loaded once at startup from YAML files and the environment, then handed to
/// [`SearchEngine::new`](crate::search::SearchEngine::new). Locations, in
/// order of precedence (later wins):
/// 1. Global `$CONFIG_DIR/keyscout/config.yaml`
/// 2. Local `.keyscout.yaml` in the current directory
/// 3. Custom config file passed to [`EngineConfig::load_from`]
/// 4. `KEYSCOUT_ALLOWED_ROOTS` for the allow-list only
///
/// ```yaml
/// allowed_roots:
///   - "/srv/projects"
/// per_file_timeout: "2s"
/// batch_size: 50
/// abort_ratio: 0.5
/// thread_count: 4
/// encoding_mode: "lossy"
/// log_level: "info"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directories every searched path must resolve under.
    /// Empty means "current working directory".
    pub allowed_roots: Vec<PathBuf>,

    /// Time budget for counting occurrences in a single file
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub per_file_timeout: Duration,

    /// Maximum number of files in flight per root
    pub batch_size: NonZeroUsize,

    /// Fraction of attempted files that may time out before the request
    /// is aborted (exceeding it aborts)
    pub abort_ratio: f64,

    /// Number of worker threads in the engine's pool
    pub thread_count: NonZeroUsize,

    /// Decoding policy for file content
    pub encoding_mode: EncodingMode,

    /// Replaces the built-in set of searchable text extensions
    pub text_extensions: Option<Vec<String>>,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

fn default_thread_count() -> NonZeroUsize {
    NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN)
}

fn default_batch_size() -> NonZeroUsize {
    NonZeroUsize::new(50).unwrap_or(NonZeroUsize::MIN)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            allowed_roots: Vec::new(),
            per_file_timeout: Duration::from_secs(2),
            batch_size: default_batch_size(),
            abort_ratio: 0.5,
            thread_count: default_thread_count(),
            encoding_mode: EncodingMode::default(),
            text_extensions: None,
            log_level: "info".to_string(),
        }
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

impl EngineConfig {
    /// Loads configuration from the default locations and the environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Loads configuration, layering a specific file over the defaults
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        let config_files = [
            dirs::config_dir().map(|p| p.join("keyscout/config.yaml")),
            Some(PathBuf::from(".keyscout.yaml")),
        ];

        for path in config_files.iter().flatten() {
            if path.exists() {
                debug!("Loading config file: {}", path.display());
                builder = builder.add_source(File::from(path.as_path()));
            }
        }

        // An explicit file is required to exist
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path));
        }

        let mut config: Self = builder.build()?.try_deserialize()?;
        if let Some(value) = std::env::var_os(ALLOWED_ROOTS_ENV) {
            config.set_allowed_roots_list(&value);
        }
        Ok(config)
    }

    /// Replaces the allow-list with a platform path-list such as
    /// `/srv/a:/srv/b`. Empty segments are ignored.
    pub fn set_allowed_roots_list(&mut self, value: &OsStr) {
        let roots: Vec<PathBuf> = std::env::split_paths(value)
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
        debug!("Allowed roots from path list: {} entries", roots.len());
        self.allowed_roots = roots;
    }

    /// Checks value ranges that serde cannot express
    pub fn validate(&self) -> SearchResult<()> {
        if self.per_file_timeout.is_zero() {
            return Err(SearchError::config_error(
                "per_file_timeout must be greater than zero",
            ));
        }
        if !(0.0..=1.0).contains(&self.abort_ratio) {
            return Err(SearchError::config_error(
                "abort_ratio must be between 0 and 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_load_config_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        let config_content = r#"
            allowed_roots: ["/srv/code", "/srv/docs"]
            per_file_timeout: "750ms"
            batch_size: 10
            abort_ratio: 0.25
            thread_count: 4
            encoding_mode: "failfast"
            text_extensions: ["rs", "toml"]
            log_level: "debug"
        "#;

        let mut file = File::create(&config_path).unwrap();
        file.write_all(config_content.as_bytes()).unwrap();

        let config = EngineConfig::load_from(Some(&config_path)).unwrap();
        assert_eq!(
            config.allowed_roots,
            vec![PathBuf::from("/srv/code"), PathBuf::from("/srv/docs")]
        );
        assert_eq!(config.per_file_timeout, Duration::from_millis(750));
        assert_eq!(config.batch_size.get(), 10);
        assert_eq!(config.abort_ratio, 0.25);
        assert_eq!(config.thread_count.get(), 4);
        assert_eq!(config.encoding_mode, EncodingMode::FailFast);
        assert_eq!(
            config.text_extensions,
            Some(vec!["rs".to_string(), "toml".to_string()])
        );
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_default_values() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        let mut file = File::create(&config_path).unwrap();
        file.write_all(b"log_level: \"warn\"\n").unwrap();

        let config = EngineConfig::load_from(Some(&config_path)).unwrap();
        assert_eq!(config.per_file_timeout, Duration::from_secs(2));
        assert_eq!(config.batch_size.get(), 50);
        assert_eq!(config.abort_ratio, 0.5);
        assert_eq!(config.encoding_mode, EncodingMode::Lossy);
        assert_eq!(config.text_extensions, None);
        assert_eq!(config.thread_count.get(), num_cpus::get().max(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        let mut file = File::create(&config_path).unwrap();
        file.write_all(b"per_file_timeout: \"soon\"\nbatch_size: 0\n")
            .unwrap();

        assert!(EngineConfig::load_from(Some(&config_path)).is_err());
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = EngineConfig::load_from(Some(Path::new("nonexistent.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_allowed_roots_path_list() {
        let mut config = EngineConfig::default();
        let joined = std::env::join_paths(["/srv/a", "/srv/b"]).unwrap();
        config.set_allowed_roots_list(&joined);
        assert_eq!(
            config.allowed_roots,
            vec![PathBuf::from("/srv/a"), PathBuf::from("/srv/b")]
        );

        config.set_allowed_roots_list(OsStr::new(""));
        assert!(config.allowed_roots.is_empty());
    }

    #[test]
    fn test_validate_ranges() {
        let config = EngineConfig {
            abort_ratio: 1.5,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SearchError::ConfigError(_))
        ));

        let config = EngineConfig {
            per_file_timeout: Duration::ZERO,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
