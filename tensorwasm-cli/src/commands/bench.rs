//! Bench command - time graph execution on a bundle.

use anyhow::{Context, Result};
use std::path::Path;
use tensorwasm_runtime::Classifier;

/// Run the bench command.
pub async fn run(dir: &Path, number: usize, repeat: usize, input: Option<&Path>) -> Result<()> {
    let runtime = super::runtime()?;
    let mut classifier = Classifier::load(&runtime, dir)
        .with_context(|| format!("Failed to load bundle: {}", dir.display()))?;

    if let Some(path) = input {
        let bytes = super::read_input(path)?;
        classifier
            .classify_raw(&bytes)
            .context("Failed to set benchmark input")?;
    }

    tracing::info!(number, repeat, "Benchmarking");
    let results = classifier
        .benchmark(number, repeat)
        .await
        .context("Benchmark failed")?;

    println!("Benchmark: {} batches of {} runs", results.len(), number.max(1));
    for (i, ms) in results.iter().enumerate() {
        println!("  batch {:>2}: {:.3} ms/run", i + 1, ms);
    }
    if !results.is_empty() {
        let mean = results.iter().sum::<f64>() / results.len() as f64;
        let min = results.iter().copied().fold(f64::INFINITY, f64::min);
        let max = results.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        println!();
        println!("Mean: {:.3} ms  Min: {:.3} ms  Max: {:.3} ms", mean, min, max);
    }

    classifier.dispose().context("Failed to release classifier")?;
    Ok(())
}
