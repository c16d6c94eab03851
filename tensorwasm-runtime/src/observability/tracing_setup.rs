//! Subscriber installation.

use super::config::{LogFormat, TracingConfig};
use anyhow::{Context, Result};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Keeps the subscriber installed. Flushes stderr when dropped.
#[derive(Debug)]
pub struct TracingGuard {
    _private: (),
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        use std::io::Write;
        let _ = std::io::stderr().flush();
    }
}

/// Install the global subscriber.
///
/// Fails if a subscriber is already installed. An unparsable filter falls
/// back to `info`.
pub fn init_tracing(config: TracingConfig) -> Result<TracingGuard> {
    let filter = EnvFilter::try_new(config.log_filter()).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(format_layer(&config))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(TracingGuard { _private: () })
}

fn format_layer(config: &TracingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_file(config.include_location())
        .with_line_number(config.include_location())
        .with_target(config.include_target());

    match config.log_format() {
        LogFormat::Json => layer
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .flatten_event(true)
            .boxed(),
        LogFormat::Pretty => layer.pretty().with_ansi(config.ansi()).boxed(),
        LogFormat::Compact => layer.compact().with_ansi(config.ansi()).boxed(),
    }
}
