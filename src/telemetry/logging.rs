//! Log output setup.
//!
//! Filter priority:
//! 1. `RUST_LOG`, if set
//! 2. `[logging]` in config.toml: a base level plus optional per-module
//!    directives such as `ndcache::nd::output=trace`
//! 3. `info`

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Output format of the log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// `[logging]` section of config.toml.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// error, warn, info, debug or trace
    pub level: String,
    pub format: LogFormat,
    /// Extra `target=level` filter directives
    pub directives: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            directives: Vec::new(),
        }
    }

    /// Directives that do not parse; they are skipped at startup.
    pub fn invalid_directives(&self) -> Vec<&str> {
        self.directives
            .iter()
            .filter(|d| d.parse::<Directive>().is_err())
            .map(String::as_str)
            .collect()
    }

    fn filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::new(parse_level(&self.level).as_str());
        for directive in &self.directives {
            if let Ok(d) = directive.parse::<Directive>() {
                filter = filter.add_directive(d);
            }
        }
        filter
    }
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init_logging(config: Option<&LogConfig>) {
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if let Some(cfg) = config {
        cfg.filter()
    } else {
        EnvFilter::new("info")
    };

    let format = config.map(|c| c.format).unwrap_or_default();
    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE),
            ),
        ),
        LogFormat::Compact => tracing::subscriber::set_global_default(
            registry.with(tracing_subscriber::fmt::layer().compact()),
        ),
        LogFormat::Pretty => {
            tracing::subscriber::set_global_default(registry.with(tracing_subscriber::fmt::layer()))
        }
    };
    if result.is_err() {
        tracing::debug!("logging already initialized");
    }
}

/// Parses a level name, falling back to info.
pub(crate) fn parse_level(level: &str) -> Level {
    level.trim().parse().unwrap_or(Level::INFO)
}

/// Whether `level` names a tracing level.
pub(crate) fn is_valid_level(level: &str) -> bool {
    level.trim().parse::<Level>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("warn"), Level::WARN);
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("trace"), Level::TRACE);
        assert_eq!(parse_level("loud"), Level::INFO);
        assert!(is_valid_level("error"));
        assert!(!is_valid_level("verbose"));
    }

    #[test]
    fn test_log_config_from_toml() {
        let config: LogConfig = toml::from_str(
            r#"
            level = "debug"
            format = "json"
            directives = ["ndcache::nd::output=trace", "ndcache=loud"]
            "#,
        )
        .unwrap();
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.invalid_directives(), vec!["ndcache=loud"]);
    }

    #[test]
    fn test_log_config_defaults() {
        let config: LogConfig = toml::from_str("").unwrap();
        assert_eq!(config, LogConfig::new());
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.invalid_directives().is_empty());
    }
}
