//! Logging configuration.

use std::env;
use std::io::IsTerminal;
use std::str::FromStr;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Multi-line human-readable output.
    Pretty,
    /// Single-line output.
    #[default]
    Compact,
}

impl FromStr for LogFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            _ => Self::Compact,
        })
    }
}

/// How events are filtered and rendered.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    log_format: LogFormat,
    log_filter: String,
    include_location: bool,
    include_target: bool,
    ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            log_filter: "info".to_string(),
            include_location: false,
            include_target: true,
            ansi: std::io::stderr().is_terminal(),
        }
    }
}

impl TracingConfig {
    /// Create a new builder.
    pub fn builder() -> TracingConfigBuilder {
        TracingConfigBuilder::default()
    }

    /// Read the configuration from the environment.
    ///
    /// - `TENSORWASM_LOG_FORMAT`: "json", "pretty" or "compact"
    /// - `TENSORWASM_LOG` or `RUST_LOG`: filter directives
    /// - `TENSORWASM_LOG_LOCATION`: "1" or "true" to log file and line
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_format: env::var("TENSORWASM_LOG_FORMAT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.log_format),
            log_filter: env::var("TENSORWASM_LOG")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or(defaults.log_filter),
            include_location: env::var("TENSORWASM_LOG_LOCATION")
                .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            ..defaults
        }
    }

    /// Log format.
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Filter directives, in `EnvFilter` syntax.
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Whether file and line are logged.
    pub fn include_location(&self) -> bool {
        self.include_location
    }

    /// Whether the event target is logged.
    pub fn include_target(&self) -> bool {
        self.include_target
    }

    /// Whether ANSI colors are used.
    pub fn ansi(&self) -> bool {
        self.ansi
    }
}

/// Builder for [`TracingConfig`].
#[derive(Debug, Clone, Default)]
pub struct TracingConfigBuilder {
    log_format: Option<LogFormat>,
    log_filter: Option<String>,
    include_location: Option<bool>,
    include_target: Option<bool>,
    ansi: Option<bool>,
}

impl TracingConfigBuilder {
    /// Set the log format.
    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.log_format = Some(format);
        self
    }

    /// Set the filter directives.
    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    /// Set the filter from a `-v` count: 0 warn, 1 info, 2 debug, more trace.
    pub fn verbosity(self, level: u8) -> Self {
        let filter = match level {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        self.log_filter(filter)
    }

    /// Log file and line.
    pub fn include_location(mut self, include: bool) -> Self {
        self.include_location = Some(include);
        self
    }

    /// Log the event target.
    pub fn include_target(mut self, include: bool) -> Self {
        self.include_target = Some(include);
        self
    }

    /// Use ANSI colors.
    pub fn ansi(mut self, ansi: bool) -> Self {
        self.ansi = Some(ansi);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> TracingConfig {
        let defaults = TracingConfig::default();
        TracingConfig {
            log_format: self.log_format.unwrap_or(defaults.log_format),
            log_filter: self.log_filter.unwrap_or(defaults.log_filter),
            include_location: self.include_location.unwrap_or(defaults.include_location),
            include_target: self.include_target.unwrap_or(defaults.include_target),
            ansi: self.ansi.unwrap_or(defaults.ansi),
        }
    }
}
