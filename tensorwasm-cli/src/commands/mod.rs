//! CLI command implementations.

pub mod bench;
pub mod inspect;
pub mod run;
pub mod version;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tensorwasm_runtime::{RuntimeConfig, WasmRuntime};

/// Runtime configured from `TENSORWASM_*` environment variables.
pub(crate) fn runtime() -> Result<Arc<WasmRuntime>> {
    let runtime =
        WasmRuntime::new(RuntimeConfig::from_env()).context("Failed to create wasm runtime")?;
    Ok(Arc::new(runtime))
}

/// Read a raw input file.
pub(crate) fn read_input(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read input: {}", path.display()))
}
