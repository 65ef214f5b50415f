//! tracing-subscriber setup.
//!
//! - `LOG_LEVEL`: ERROR, WARN, INFO, DEBUG, TRACE (default INFO)
//! - `LOG_FORMAT`: json, pretty, compact (default compact)
//! - `RUST_LOG`: overrides the filter entirely

use std::env;

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Compact,
        }
    }
}

pub fn parse_level(s: &str) -> Level {
    match s.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

pub fn init_logging(level: Level, format: LogFormat) {
    let filter = match env::var("RUST_LOG") {
        Ok(rust_log) => EnvFilter::new(rust_log),
        Err(_) => EnvFilter::new(level.to_string()),
    };

    let subscriber = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => subscriber.with(fmt::layer().json()).init(),
        LogFormat::Pretty => subscriber.with(fmt::layer().pretty().with_ansi(true)).init(),
        LogFormat::Compact => subscriber
            .with(fmt::layer().compact().with_ansi(true).with_target(false))
            .init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_values_fall_back() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("yaml"), LogFormat::Compact);
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("loud"), Level::INFO);
    }
}
