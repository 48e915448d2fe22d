//! Subcommand implementations

pub mod costs;
pub mod model;
pub mod recommendations;
pub mod seed;

use anyhow::{Context, Result};
use ccopt_lib::explain::{FileExpiringStore, OpenAiGenerator};
use ccopt_lib::model::ModelStore;
use ccopt_lib::store::InMemoryMetricsStore;
use ccopt_lib::CostOptimizer;
use std::sync::Arc;

use crate::config::Settings;

/// Wire the library to the local snapshot, model directory and cache directory
pub fn build_optimizer(settings: &Settings) -> Result<CostOptimizer> {
    let source = InMemoryMetricsStore::load(&settings.snapshot_path).with_context(|| {
        format!(
            "Failed to load metrics snapshot {} (run `ccopt seed` first)",
            settings.snapshot_path.display()
        )
    })?;
    let model_store = ModelStore::new(settings.model_dir.clone()).with_context(|| {
        format!("Failed to open model directory {}", settings.model_dir.display())
    })?;
    let cache_store = FileExpiringStore::new(&settings.cache_dir).with_context(|| {
        format!("Failed to open cache directory {}", settings.cache_dir.display())
    })?;
    let generator =
        OpenAiGenerator::new(settings.generator_config()).context("Failed to create text generator")?;

    Ok(CostOptimizer::new(
        Arc::new(source),
        model_store,
        Arc::new(cache_store),
        Arc::new(generator),
        settings.optimizer_config(),
    ))
}
