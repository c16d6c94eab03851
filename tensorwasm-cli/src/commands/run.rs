//! Run command - classify one input file.

use anyhow::{Context, Result};
use std::path::Path;
use tensorwasm_runtime::Classifier;

/// Run the run command.
pub async fn run(dir: &Path, input: &Path, top: usize, json: bool) -> Result<()> {
    let runtime = super::runtime()?;
    let mut classifier = Classifier::load(&runtime, dir)
        .with_context(|| format!("Failed to load bundle: {}", dir.display()))?;

    let bytes = super::read_input(input)?;
    tracing::info!(input = %input.display(), bytes = bytes.len(), "Classifying");
    let result = classifier
        .classify_raw(&bytes)
        .context("Classification failed")?;
    let ranked = result.top_k(top);

    if json {
        let entries: Vec<_> = ranked
            .iter()
            .map(|&(index, score)| {
                serde_json::json!({
                    "index": index,
                    "label": classifier.label(index),
                    "score": score,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        let timings = classifier.timings();
        println!("Top {} of {} classes:", ranked.len(), result.scores.len());
        for (rank, (index, score)) in ranked.iter().enumerate() {
            let label = classifier.label(*index).unwrap_or("-");
            println!("  {:>2}. [{:>4}] {:<24} {:.6}", rank + 1, index, label, score);
        }
        println!();
        println!(
            "Load: read {:.1} ms, instantiate {:.1} ms, weights {:.1} ms",
            timings.read_artifacts.as_secs_f64() * 1000.0,
            timings.instantiate.as_secs_f64() * 1000.0,
            timings.populate_weights.as_secs_f64() * 1000.0,
        );
    }

    classifier.dispose().context("Failed to release classifier")?;
    Ok(())
}
