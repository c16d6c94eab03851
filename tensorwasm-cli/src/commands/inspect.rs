//! Inspect command - show what a bundle contains and what its module exposes.

use anyhow::{Context, Result};
use std::path::Path;
use tensorwasm_runtime::ffi::REQUIRED_EXPORTS;
use tensorwasm_runtime::{ArtifactBundle, Imports, Instance};

/// Run the inspect command.
pub async fn run(dir: &Path, show_exports: bool) -> Result<()> {
    tracing::info!(bundle = %dir.display(), "Inspecting bundle");

    let bundle = ArtifactBundle::load(dir)
        .with_context(|| format!("Failed to load bundle: {}", dir.display()))?;
    let manifest = bundle.manifest();

    println!("Bundle: {}", dir.display());
    println!("========{}", "=".repeat(dir.display().to_string().len()));
    println!();
    println!("Graph:        {}", manifest.graph);
    println!("Params:       {} ({} bytes)", manifest.params, bundle.params().len());
    println!("Library:      {} ({} bytes)", manifest.library, bundle.library().len());
    println!("Input:        {} {:?} {}", manifest.input_name, manifest.input_shape, manifest.input_type);
    println!("Output:       {:?} {}", manifest.output_shape, manifest.output_type());
    match bundle.labels() {
        Some(labels) => println!("Labels:       {} classes", labels.len()),
        None => println!("Labels:       none"),
    }
    println!("Read time:    {:.2} ms", bundle.read_time().as_secs_f64() * 1000.0);
    println!();

    let runtime = super::runtime()?;
    let compiled = runtime
        .compile(&manifest.library, bundle.library())
        .context("Failed to compile module")?;
    let exports = compiled.export_names();

    let missing: Vec<&str> = REQUIRED_EXPORTS
        .iter()
        .copied()
        .filter(|name| !exports.iter().any(|e| e == name))
        .collect();
    if missing.is_empty() {
        println!("✓ Module exports the full C API ({} exports)", exports.len());
    } else {
        println!("✗ Module is missing {} C API exports:", missing.len());
        for name in &missing {
            println!("  - {}", name);
        }
    }
    if show_exports {
        println!();
        println!("Exports:");
        for name in &exports {
            println!("  {}", name);
        }
    }
    if !missing.is_empty() {
        anyhow::bail!("Module cannot be bridged");
    }
    println!();

    let mut imports = Imports::new().with_wasi();
    if manifest.is_quantized() {
        imports = imports.with_math_shims();
    }
    let mut instance =
        Instance::new(&runtime, &compiled, imports).context("Failed to instantiate module")?;

    let mut globals = instance
        .list_global_func_names()
        .context("Failed to list global functions")?;
    globals.sort();
    println!("Global functions ({}):", globals.len());
    for name in &globals {
        println!("  {}", name);
    }

    instance.dispose().context("Failed to release instance")?;
    Ok(())
}
