//! Crate-level error type and error-text sanitization
//!
//! Each module owns a focused error enum; [`MonitorError`] aggregates them for
//! the orchestration boundary (the monitor loop and the CLI).

use crate::config::ConfigError;
use crate::session::{ConnectError, DisconnectError};
use crate::transport::TransportError;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Main error type for monitor operations
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connect failed: {0}")]
    Connect(#[from] ConnectError),

    #[error("Disconnect failed: {0}")]
    Disconnect(#[from] DisconnectError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Monitor already {state}")]
    InvalidLifecycle { state: &'static str },
}

/// Result type for monitor operations
pub type MonitorResult<T> = Result<T, MonitorError>;

const MAX_ERROR_LEN: usize = 500;

fn secret_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").ok())
        .as_ref()
}

fn credential_path_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|certs?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
                .ok()
        })
        .as_ref()
}

/// Redact secrets and credential paths from error text before it is stored
/// in a publish result or status payload, and cap its length
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    if let Some(pattern) = secret_pattern() {
        sanitized = pattern.replace_all(&sanitized, "${1}=***").into_owned();
    }

    if let Some(pattern) = credential_path_pattern() {
        sanitized = pattern
            .replace_all(&sanitized, "/***REDACTED***/")
            .into_owned();
    }

    if sanitized.len() > MAX_ERROR_LEN {
        let suffix = "...[truncated]";
        let mut cut = MAX_ERROR_LEN - suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], suffix);
    }

    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_redaction() {
        let sanitized = sanitize_error_message("auth failed: password=secret123 token=abc456");

        assert!(!sanitized.contains("secret123"));
        assert!(!sanitized.contains("abc456"));
        assert!(sanitized.contains("password=***"));
        assert!(sanitized.contains("token=***"));
    }

    #[test]
    fn test_sanitize_case_insensitive_with_colons() {
        let sanitized = sanitize_error_message("PASSWORD: hunter2 Key=xyz");
        assert!(!sanitized.contains("hunter2"));
        assert!(!sanitized.contains("xyz"));
    }

    #[test]
    fn test_certificate_path_redaction() {
        let message = "failed to load /home/pi/fieldmon/certs/device-private.pem.key";
        let sanitized = sanitize_error_message(message);

        assert!(sanitized.contains("/***REDACTED***/"));
        assert!(!sanitized.contains("device-private.pem.key"));
    }

    #[test]
    fn test_long_message_truncation() {
        let sanitized = sanitize_error_message(&"x".repeat(600));

        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let sanitized = sanitize_error_message(&"°".repeat(400));
        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_exactly_500_chars_untouched() {
        let message = "x".repeat(500);
        assert_eq!(sanitize_error_message(&message), message);
    }

    #[test]
    fn test_empty_message() {
        assert_eq!(sanitize_error_message(""), "");
    }

    #[test]
    fn test_error_display() {
        let error = MonitorError::InvalidLifecycle { state: "stopped" };
        assert_eq!(error.to_string(), "Monitor already stopped");
    }
}
