//! Synthetic data generation

use anyhow::{Context, Result};
use ccopt_lib::store::synthetic::{self, SyntheticConfig};
use serde::Serialize;

use crate::config::Settings;
use crate::output::{print_json, print_success, OutputFormat};

#[derive(Serialize)]
struct SeedSummary {
    path: String,
    instances: usize,
    samples: usize,
}

/// Write a deterministic synthetic snapshot to the configured path
pub fn seed(settings: &Settings, instances: usize, days: i64, seed: u64, format: OutputFormat) -> Result<()> {
    let snapshot = synthetic::generate(&SyntheticConfig {
        instances,
        days,
        seed,
        ..Default::default()
    });
    snapshot.save(&settings.snapshot_path).with_context(|| {
        format!("Failed to write snapshot {}", settings.snapshot_path.display())
    })?;

    let summary = SeedSummary {
        path: settings.snapshot_path.display().to_string(),
        instances: snapshot.instances.len(),
        samples: snapshot.metrics.len(),
    };
    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Table => print_success(&format!(
            "Wrote {} instances and {} samples to {}",
            summary.instances, summary.samples, summary.path
        )),
    }
    Ok(())
}
