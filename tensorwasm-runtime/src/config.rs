//! Runtime configuration.
//!
//! Controls engine features (fuel, epoch interruption, debug info), module
//! caching and per-instance limits such as the maximum linear memory size.

use std::env;
use wasmtime::Config;

/// Default maximum memory pages (64 KB per page).
const DEFAULT_MAX_MEMORY_PAGES: u64 = 16_384; // 1 GB

/// Default fuel amount for execution limiting.
const DEFAULT_FUEL: u64 = 10_000_000_000;

/// Default epoch deadline, in ticks, when epoch interruption is enabled.
const DEFAULT_EPOCH_DEADLINE: u64 = 1;

/// Default size of a freshly created scratch call stack.
const DEFAULT_CALL_STACK_SIZE: usize = 128;

/// Configuration for the bridge runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Maximum memory pages an instance may grow to (64 KB per page).
    pub max_memory_pages: u64,
    /// Whether to enable fuel-based execution limiting.
    pub fuel_enabled: bool,
    /// Initial fuel amount when fuel is enabled.
    pub fuel_amount: u64,
    /// Whether to enable epoch-based interruption.
    pub epoch_interruption: bool,
    /// Ticks until a running call is interrupted, when epochs are enabled.
    pub epoch_deadline: u64,
    /// Whether to cache compiled modules.
    pub cache_modules: bool,
    /// Enable debug info in compiled modules.
    pub debug_info: bool,
    /// Initial byte size of scratch call stacks.
    pub call_stack_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_memory_pages: DEFAULT_MAX_MEMORY_PAGES,
            fuel_enabled: false,
            fuel_amount: DEFAULT_FUEL,
            epoch_interruption: false,
            epoch_deadline: DEFAULT_EPOCH_DEADLINE,
            cache_modules: true,
            debug_info: false,
            call_stack_size: DEFAULT_CALL_STACK_SIZE,
        }
    }
}

impl RuntimeConfig {
    /// Create a configuration for serving inference.
    pub fn production() -> Self {
        Self::default()
    }

    /// Create a configuration for testing with stricter limits.
    pub fn testing() -> Self {
        Self {
            max_memory_pages: 1024, // 64 MB
            fuel_enabled: true,
            fuel_amount: 1_000_000_000,
            epoch_interruption: false,
            epoch_deadline: DEFAULT_EPOCH_DEADLINE,
            cache_modules: false,
            debug_info: true,
            call_stack_size: DEFAULT_CALL_STACK_SIZE,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Environment variables:
    /// - `TENSORWASM_MAX_MEMORY_PAGES`: memory limit in 64 KB pages
    /// - `TENSORWASM_FUEL`: enable fuel with the given amount
    /// - `TENSORWASM_EPOCH_DEADLINE`: enable epoch interruption with the given deadline
    /// - `TENSORWASM_CACHE`: "false" to disable module caching
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(pages) = env_parse::<u64>("TENSORWASM_MAX_MEMORY_PAGES") {
            config.max_memory_pages = pages;
        }
        if let Some(fuel) = env_parse::<u64>("TENSORWASM_FUEL") {
            config = config.with_fuel(true, fuel);
        }
        if let Some(deadline) = env_parse::<u64>("TENSORWASM_EPOCH_DEADLINE") {
            config = config.with_epoch_interruption(true, deadline);
        }
        if let Ok(cache) = env::var("TENSORWASM_CACHE") {
            config.cache_modules = !cache.eq_ignore_ascii_case("false") && cache != "0";
        }
        config
    }

    /// Set maximum memory pages.
    pub fn with_max_memory_pages(mut self, pages: u64) -> Self {
        self.max_memory_pages = pages;
        self
    }

    /// Enable or disable fuel-based limiting.
    pub fn with_fuel(mut self, enabled: bool, amount: u64) -> Self {
        self.fuel_enabled = enabled;
        self.fuel_amount = amount;
        self
    }

    /// Enable or disable epoch interruption.
    pub fn with_epoch_interruption(mut self, enabled: bool, deadline: u64) -> Self {
        self.epoch_interruption = enabled;
        self.epoch_deadline = deadline;
        self
    }

    /// Enable or disable module caching.
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_modules = enabled;
        self
    }

    /// Set the initial scratch call stack size.
    pub fn with_call_stack_size(mut self, bytes: usize) -> Self {
        self.call_stack_size = bytes.max(8);
        self
    }

    /// Maximum linear memory size in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        usize::try_from(self.max_memory_pages.saturating_mul(65_536)).unwrap_or(usize::MAX)
    }

    /// Create a Wasmtime Config from this configuration.
    pub(crate) fn to_wasmtime_config(&self) -> Config {
        let mut config = Config::new();
        config.epoch_interruption(self.epoch_interruption);
        config.consume_fuel(self.fuel_enabled);
        config.debug_info(self.debug_info);
        config.wasm_memory64(true);
        config.strategy(wasmtime::Strategy::Cranelift);
        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
