//! Observability: structured logging and span helpers

pub mod logging;

pub use logging::{
    init_default_logging, init_from_config, init_logging, parse_level, LogFormat, LogSettings,
};

// Span macros for structured logging
pub use logging::{publish_span, session_span, tick_span};
