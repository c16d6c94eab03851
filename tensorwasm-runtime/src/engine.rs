//! Engine and compiled-module cache.
//!
//! One [`WasmRuntime`] can back any number of bridge instances. Model
//! binaries are compiled once per distinct content; every caller still gets
//! a [`CompiledModule`] labelled with the name it asked for.

use crate::config::RuntimeConfig;
use dashmap::DashMap;
use std::hash::Hasher;
use std::sync::Arc;
use tensorwasm_core::error::{BridgeError, Result};
use wasmtime::{Engine, Module};

/// Identity of a module binary in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BinaryKey {
    len: usize,
    digest: u64,
}

impl BinaryKey {
    /// Key for `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        hasher.write(bytes);
        Self {
            len: bytes.len(),
            digest: hasher.finish(),
        }
    }
}

/// A compiled module under the name one caller loaded it as.
pub struct CompiledModule {
    module: Module,
    name: String,
    key: BinaryKey,
}

impl CompiledModule {
    /// The Wasmtime module.
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Name used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cache key of the binary this was compiled from.
    pub fn key(&self) -> BinaryKey {
        self.key
    }

    /// Names of all exports.
    pub fn export_names(&self) -> Vec<String> {
        self.module
            .exports()
            .map(|export| export.name().to_string())
            .collect()
    }
}

/// Wasmtime engine plus compiled module cache.
pub struct WasmRuntime {
    engine: Engine,
    config: RuntimeConfig,
    /// Wasmtime modules share their code, so the cache holds them directly.
    modules: DashMap<BinaryKey, Module>,
}

impl WasmRuntime {
    /// Create a runtime with the given configuration.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let engine = Engine::new(&config.to_wasmtime_config()).map_err(|e| BridgeError::Compile {
            module: "engine".to_string(),
            cause: e.to_string(),
        })?;
        Ok(Self {
            engine,
            config,
            modules: DashMap::new(),
        })
    }

    /// Create a runtime with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(RuntimeConfig::default())
    }

    /// The shared Wasmtime engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Configuration this runtime was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Compile `wasm_bytes` as `name`.
    ///
    /// With caching on, a binary seen before reuses its compiled code but
    /// still reports `name`.
    pub fn compile(&self, name: &str, wasm_bytes: &[u8]) -> Result<Arc<CompiledModule>> {
        let key = BinaryKey::of(wasm_bytes);
        let cached = self
            .config
            .cache_modules
            .then(|| self.modules.get(&key).map(|m| m.value().clone()))
            .flatten();

        let module = match cached {
            Some(module) => {
                tracing::debug!(module = name, bytes = key.len, "Reusing compiled module");
                module
            }
            None => {
                let module =
                    Module::new(&self.engine, wasm_bytes).map_err(|e| BridgeError::Compile {
                        module: name.to_string(),
                        cause: e.to_string(),
                    })?;
                tracing::debug!(module = name, bytes = key.len, "Compiled module");
                if self.config.cache_modules {
                    self.modules.insert(key, module.clone());
                }
                module
            }
        };

        Ok(Arc::new(CompiledModule {
            module,
            name: name.to_string(),
            key,
        }))
    }

    /// Drop every cached compilation.
    pub fn clear_cache(&self) {
        self.modules.clear();
    }

    /// Number of distinct binaries in the cache.
    pub fn cache_size(&self) -> usize {
        self.modules.len()
    }

    /// Initial fuel for new stores, if fuel is enabled.
    pub fn initial_fuel(&self) -> Option<u64> {
        self.config.fuel_enabled.then_some(self.config.fuel_amount)
    }
}
