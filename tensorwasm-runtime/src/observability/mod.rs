//! Logging setup for hosts embedding the bridge.
//!
//! The bridge itself only emits `tracing` events. Binaries call
//! [`init_tracing`] once to install a subscriber; library users are free to
//! install their own instead.
//!
//! The format is chosen with `TENSORWASM_LOG_FORMAT`:
//! - `json` - one JSON object per line
//! - `pretty` - multi-line human-readable output
//! - `compact` - single-line output (default)
//!
//! Events go to stderr so command output on stdout stays machine-readable.
//!
//! # Example
//!
//! ```ignore
//! use tensorwasm_runtime::observability::{TracingConfig, init_tracing};
//!
//! let _guard = init_tracing(TracingConfig::from_env())?;
//! ```

mod config;
mod tracing_setup;

pub use config::{LogFormat, TracingConfig, TracingConfigBuilder};
pub use tracing_setup::{TracingGuard, init_tracing};

/// Span covering one model load, carrying the model name.
#[macro_export]
macro_rules! instrument_model {
    ($model:expr, $operation:expr) => {
        tracing::info_span!("model", model = %$model, operation = $operation)
    };
}
