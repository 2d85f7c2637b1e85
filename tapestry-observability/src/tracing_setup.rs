//! Process-wide `tracing` subscriber setup.
//!
//! Scaled down from `r2e_observability::tracing_setup::init_tracing`: that
//! one wires an OpenTelemetry exporter behind the fmt layer because R2E is a
//! distributed HTTP service. Tapestry has no span-exporting backend to talk
//! to, so only the console half survives here — same `EnvFilter` +
//! `tracing_subscriber::fmt` layering, same Pretty/Json choice, no tracer
//! provider to build or shut down.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Install the global `tracing` subscriber. `default_filter` is used when
/// `RUST_LOG` is not set (e.g. `"info"`, matching `EngineConfig::log_level`).
///
/// Panics if a subscriber is already installed — call this once, at process
/// start.
pub fn init_tracing(default_filter: &str, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    match format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE);
            Registry::default().with(env_filter).with(fmt_layer).init();
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE);
            Registry::default().with(env_filter).with(fmt_layer).init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("anything-else"), LogFormat::Pretty);
    }
}
