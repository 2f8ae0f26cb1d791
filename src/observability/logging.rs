//! Structured logging on tracing
//!
//! ## Log Format Options
//!
//! - `json` - structured JSON for log aggregation
//! - `pretty` - multi-line, coloured, for development
//! - `compact` - coloured single lines, the default for field devices
//!
//! ## Environment Variables
//!
//! `LOG_LEVEL`, `LOG_FORMAT` and `LOG_SPANS` override the `[logging]` section
//! of the config file. `RUST_LOG` overrides the level filter entirely.
//!
//! ```bash
//! LOG_FORMAT=json LOG_LEVEL=DEBUG fieldmon run --simulate
//! ```

use crate::config::LoggingSection;
use std::env;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    /// Unknown names fall back to compact
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Compact,
        }
    }
}

/// Unknown names fall back to INFO
pub fn parse_level(s: &str) -> Level {
    match s.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" | "WARNING" => Level::WARN,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

fn build_filter(level: Level) -> EnvFilter {
    if let Ok(rust_log) = env::var("RUST_LOG") {
        return EnvFilter::new(rust_log);
    }

    let mut filter = EnvFilter::new(level.to_string());
    // Reduce noise from dependencies
    for directive in ["rumqttc=warn", "tokio=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Initialize logging with manual configuration
///
/// A second call is a no-op; the first subscriber stays installed.
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) {
    let span_events = if include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let subscriber = tracing_subscriber::registry().with(build_filter(level));

    let result = match format {
        LogFormat::Json => subscriber
            .with(fmt::layer().json().with_span_events(span_events))
            .try_init(),
        LogFormat::Pretty => subscriber
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(true)
                    .with_span_events(span_events),
            )
            .try_init(),
        LogFormat::Compact => subscriber
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(true)
                    .with_target(false)
                    .with_span_events(span_events),
            )
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("global subscriber already installed");
    }
}

/// Initialize logging from environment variables alone
pub fn init_default_logging() {
    init_from_config(&LoggingSection::default());
}

/// Initialize logging from the `[logging]` section, letting the environment win
pub fn init_from_config(section: &LoggingSection) {
    let settings = LogSettings::resolve(section, |key| env::var(key).ok());
    init_logging(settings.level, settings.format, settings.include_spans);
}

/// Effective logging settings after environment overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    pub level: Level,
    pub format: LogFormat,
    pub include_spans: bool,
}

impl LogSettings {
    pub fn resolve(section: &LoggingSection, var: impl Fn(&str) -> Option<String>) -> Self {
        let level = var("LOG_LEVEL").unwrap_or_else(|| section.level.clone());
        let format = var("LOG_FORMAT").unwrap_or_else(|| section.format.clone());
        let include_spans = var("LOG_SPANS")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(section.spans);

        Self {
            level: parse_level(&level),
            format: LogFormat::parse(&format),
            include_spans,
        }
    }
}

/// Span for one monitor tick
#[macro_export]
macro_rules! tick_span {
    ($($field:tt)*) => {
        tracing::info_span!("monitor_tick", $($field)*)
    };
}

/// Span for one outbound publish
#[macro_export]
macro_rules! publish_span {
    ($($field:tt)*) => {
        tracing::debug_span!("publish", $($field)*)
    };
}

/// Span for a session lifecycle operation
#[macro_export]
macro_rules! session_span {
    ($($field:tt)*) => {
        tracing::info_span!("session", $($field)*)
    };
}

pub use {publish_span, session_span, tick_span};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_log_format_parse_case_insensitive() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("PrEtTy"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
    }

    #[test]
    fn test_log_format_parse_invalid_defaults_to_compact() {
        assert_eq!(LogFormat::parse("xml"), LogFormat::Compact);
        assert_eq!(LogFormat::parse(""), LogFormat::Compact);
    }

    #[test]
    fn test_parse_level() {
        let cases = [
            ("error", Level::ERROR),
            ("WARNING", Level::WARN),
            ("info", Level::INFO),
            ("Debug", Level::DEBUG),
            ("trace", Level::TRACE),
            ("loud", Level::INFO),
        ];
        for (input, expected) in cases {
            assert_eq!(parse_level(input), expected, "Failed for input: {input}");
        }
    }

    #[test]
    fn test_settings_come_from_config_without_env() {
        let section = LoggingSection {
            level: "debug".to_string(),
            format: "json".to_string(),
            spans: true,
        };

        let settings = LogSettings::resolve(&section, env_of(&[]));

        assert_eq!(settings.level, Level::DEBUG);
        assert_eq!(settings.format, LogFormat::Json);
        assert!(settings.include_spans);
    }

    #[test]
    fn test_env_overrides_config() {
        let section = LoggingSection {
            level: "debug".to_string(),
            format: "json".to_string(),
            spans: true,
        };

        let settings = LogSettings::resolve(
            &section,
            env_of(&[("LOG_LEVEL", "warn"), ("LOG_FORMAT", "pretty"), ("LOG_SPANS", "no")]),
        );

        assert_eq!(settings.level, Level::WARN);
        assert_eq!(settings.format, LogFormat::Pretty);
        assert!(!settings.include_spans);
    }
}
