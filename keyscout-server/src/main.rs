use anyhow::{Context, Result};
use clap::Parser;
use keyscout::{AllowedRoots, EngineConfig, SearchEngine};
use std::io;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod rpc;
mod tools;

use rpc::Server;
use tools::{KeywordSearchTool, ToolRegistry};

/// Keyword search over allowed directories, served as JSON-RPC on stdio
#[derive(Parser, Debug)]
#[command(name = "keyscout-server", author, version, about, long_about = None)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory searches may touch (repeatable; replaces configured roots)
    #[arg(long = "allowed-root")]
    allowed_roots: Vec<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long)]
    log_level: Option<String>,

    /// Time budget for counting one file, e.g. "500ms" or "2s"
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Number of worker threads
    #[arg(short = 'j', long)]
    threads: Option<NonZeroUsize>,
}

impl Cli {
    fn apply(&self, config: &mut EngineConfig) {
        if !self.allowed_roots.is_empty() {
            config.allowed_roots = self.allowed_roots.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(timeout) = self.timeout {
            config.per_file_timeout = timeout;
        }
        if let Some(threads) = self.threads {
            config.thread_count = threads;
        }
    }
}

fn init_logging(level: &str) {
    // stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        EngineConfig::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply(&mut config);
    init_logging(&config.log_level);

    let allowed = AllowedRoots::from_config(&config).context("failed to resolve allowed roots")?;
    for root in allowed.roots() {
        info!("Allowed root: {}", root.display());
    }
    let engine = SearchEngine::new(config, allowed).context("failed to start search engine")?;

    let mut registry = ToolRegistry::new();
    registry.register(KeywordSearchTool::new(Arc::new(engine)));
    let server = Server::new(registry);

    info!("keyscout-server {} ready on stdio", env!("CARGO_PKG_VERSION"));
    let stdin = io::stdin();
    let stdout = io::stdout();
    server
        .serve(stdin.lock(), stdout.lock())
        .context("stdio transport failed")?;

    info!("Input closed, shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "keyscout-server",
            "--allowed-root",
            "/srv/a",
            "--allowed-root",
            "/srv/b",
            "--timeout",
            "250ms",
            "--log-level",
            "debug",
            "-j",
            "3",
        ]);
        let mut config = EngineConfig::default();
        cli.apply(&mut config);

        assert_eq!(
            config.allowed_roots,
            vec![PathBuf::from("/srv/a"), PathBuf::from("/srv/b")]
        );
        assert_eq!(config.per_file_timeout, Duration::from_millis(250));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.thread_count.get(), 3);
    }

    #[test]
    fn test_cli_keeps_config_without_flags() {
        let cli = Cli::parse_from(["keyscout-server"]);
        let mut config = EngineConfig {
            allowed_roots: vec![PathBuf::from("/srv/configured")],
            ..Default::default()
        };
        cli.apply(&mut config);
        assert_eq!(config.allowed_roots, vec![PathBuf::from("/srv/configured")]);
        assert_eq!(config.per_file_timeout, Duration::from_secs(2));
    }
}
