//! Configuration management for the CLI

use anyhow::{ensure, Context, Result};
use ccopt_lib::explain::{CacheConfig, GeneratorConfig};
use ccopt_lib::features::FeatureConfig;
use ccopt_lib::model::{LabelingRule, TrainerConfig};
use ccopt_lib::recommend::EngineConfig;
use ccopt_lib::OptimizerConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings file looked up in the working directory when `--config` is absent
const DEFAULT_CONFIG_NAME: &str = "ccopt";

/// Effective CLI settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Metrics snapshot written by `ccopt seed`
    pub snapshot_path: PathBuf,
    pub model_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub lookback_days: i64,
    pub label_cpu_threshold: f64,
    pub label_mem_threshold: f64,
    pub decision_threshold: f64,
    pub reduction_fraction: f64,
    pub versions_to_keep: usize,
    pub cache_ttl_days: i64,
    pub generation_timeout_secs: u64,
    pub openai_base_url: String,
    pub openai_model: String,
    pub openai_api_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        let generator = GeneratorConfig::default();
        let trainer = TrainerConfig::default();
        let engine = EngineConfig::default();
        let cache = CacheConfig::default();
        Self {
            snapshot_path: PathBuf::from("data/snapshot.json"),
            model_dir: PathBuf::from("data/models"),
            cache_dir: PathBuf::from("data/cache"),
            lookback_days: FeatureConfig::default().lookback_days,
            label_cpu_threshold: trainer.labeling.cpu_threshold,
            label_mem_threshold: trainer.labeling.mem_threshold,
            decision_threshold: engine.decision_threshold,
            reduction_fraction: engine.reduction_fraction,
            versions_to_keep: trainer.versions_to_keep,
            cache_ttl_days: cache.ttl.num_days(),
            generation_timeout_secs: cache.generation_timeout.as_secs(),
            openai_base_url: generator.base_url,
            openai_model: generator.model,
            openai_api_key: None,
        }
    }
}

impl Settings {
    /// Load defaults, then the settings file, then `CCOPT_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix("CCOPT").try_parsing(true))
            .build()
            .context("Failed to read configuration")?;

        let mut settings: Settings = config
            .try_deserialize()
            .context("Failed to parse configuration")?;
        ensure!(
            settings.versions_to_keep >= 1,
            "versions_to_keep must be at least 1 (got {})",
            settings.versions_to_keep
        );

        if settings.openai_api_key.as_deref().map_or(true, str::is_empty) {
            settings.openai_api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        }
        Ok(settings)
    }

    pub fn optimizer_config(&self) -> OptimizerConfig {
        let mut config = OptimizerConfig::default();
        config.features.lookback_days = self.lookback_days;
        config.trainer = TrainerConfig {
            labeling: LabelingRule {
                cpu_threshold: self.label_cpu_threshold,
                mem_threshold: self.label_mem_threshold,
            },
            decision_threshold: self.decision_threshold,
            versions_to_keep: self.versions_to_keep,
            ..Default::default()
        };
        config.engine.decision_threshold = self.decision_threshold;
        config.engine.reduction_fraction = self.reduction_fraction;
        config.cache = CacheConfig {
            ttl: chrono::Duration::days(self.cache_ttl_days),
            generation_timeout: Duration::from_secs(self.generation_timeout_secs),
        };
        config
    }

    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            base_url: self.openai_base_url.clone(),
            api_key: self.openai_api_key.clone(),
            model: self.openai_model.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_library() {
        let settings = Settings::default();
        assert_eq!(settings.lookback_days, 7);
        assert_eq!(settings.label_cpu_threshold, 20.0);
        assert_eq!(settings.label_mem_threshold, 25.0);
        assert_eq!(settings.cache_ttl_days, 7);
        assert_eq!(settings.generation_timeout_secs, 20);
        assert_eq!(settings.openai_model, "gpt-4o-mini");
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(
            &path,
            "model_dir = \"/tmp/models\"\nlabel_cpu_threshold = 15.0\nreduction_fraction = 0.5\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.model_dir, PathBuf::from("/tmp/models"));
        assert_eq!(settings.lookback_days, 7);

        let config = settings.optimizer_config();
        assert_eq!(config.trainer.labeling.cpu_threshold, 15.0);
        assert_eq!(config.trainer.labeling.mem_threshold, 25.0);
        assert_eq!(config.engine.reduction_fraction, 0.5);
    }

    #[test]
    fn test_zero_versions_to_keep_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "versions_to_keep = 0\n").unwrap();

        let err = Settings::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("versions_to_keep"), "{}", err);
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let dir = TempDir::new().unwrap();
        assert!(Settings::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
