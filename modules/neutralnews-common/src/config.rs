use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::types::GroupId;

/// Application configuration loaded from environment variables.
/// Contains only secrets and env-specific values; models, grouping
/// thresholds and dispatcher limits live in the TOML FileConfig.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub anthropic_api_key: String,
    pub voyage_api_key: String,
    pub config_path: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY")
                .context("ANTHROPIC_API_KEY must be set")?,
            voyage_api_key: std::env::var("VOYAGE_API_KEY")
                .context("VOYAGE_API_KEY must be set")?,
            config_path: std::env::var("NEUTRALNEWS_CONFIG").ok().map(PathBuf::from),
        };

        config.log_keys();
        Ok(config)
    }

    /// Load the TOML file named by `NEUTRALNEWS_CONFIG`, or defaults when unset.
    pub fn file_config(&self) -> Result<FileConfig> {
        match &self.config_path {
            Some(path) => load_config(path),
            None => Ok(FileConfig::default()),
        }
    }

    fn log_keys(&self) {
        fn preview(val: &str) -> String {
            let n = val.char_indices().nth(5).map(|(i, _)| i).unwrap_or(val.len());
            format!("{}...({} chars)", &val[..n], val.len())
        }

        tracing::info!("Config loaded:");
        tracing::info!("  ANTHROPIC_API_KEY: {}", preview(&self.anthropic_api_key));
        tracing::info!("  VOYAGE_API_KEY: {}", preview(&self.voyage_api_key));
        tracing::info!(
            "  NEUTRALNEWS_CONFIG: {}",
            self.config_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<defaults>".to_string())
        );
    }
}

/// TOML-backed configuration. Every section is optional; missing keys take
/// their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub models: ModelsConfig,
    pub grouping: GroupingConfig,
    pub change_gate: ChangeGateConfig,
    pub synthesis: SynthesisConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelsConfig {
    pub synthesis: String,
    pub embedding: String,
    pub embedding_base_url: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            synthesis: "claude-sonnet-4-5".to_string(),
            embedding: "voyage-3-large".to_string(),
            embedding_base_url: "https://api.voyageai.com/v1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GroupingConfig {
    /// Upper bound on k for the k-NN graph.
    pub max_neighbors: usize,
    /// Cosine distance threshold for density reachability.
    pub eps: f32,
    pub min_samples: usize,
    pub embedding_batch_size: usize,
    /// Grouped items younger than this act as reference items.
    pub reference_window_hours: i64,
    pub merge_similarity: f32,
    pub hot_merge_similarity: f32,
    /// Oversized groups that new clusters should avoid merging into.
    pub hot_groups: Vec<GroupId>,
    pub hot_alternative_min_support: usize,
    /// A hot cluster is split only when strictly larger than this.
    pub subdivision_min_size: usize,
    pub max_partition_k: usize,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            max_neighbors: 5,
            eps: 0.25,
            min_samples: 2,
            embedding_batch_size: 256,
            reference_window_hours: 24,
            merge_similarity: 0.7,
            hot_merge_similarity: 0.9,
            hot_groups: Vec::new(),
            hot_alternative_min_support: 2,
            subdivision_min_size: 8,
            max_partition_k: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChangeGateConfig {
    pub change_ratio_threshold: f64,
    /// Ascending member counts; moving from `[lo, hi)` to `>= hi` for any
    /// consecutive pair forces an update.
    pub bucket_boundaries: Vec<usize>,
}

impl Default for ChangeGateConfig {
    fn default() -> Self {
        Self {
            change_ratio_threshold: 0.5,
            bucket_boundaries: vec![3, 6, 9, 12],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SynthesisConfig {
    pub max_workers: usize,
    pub calls_per_window: usize,
    pub window_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub reduced_source_count: usize,
    /// Character caps applied, shortest source first, on the reduce-and-retry path.
    pub reduced_text_chars: Vec<usize>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            calls_per_window: 50,
            window_secs: 60,
            max_attempts: 3,
            backoff_base_secs: 2,
            reduced_source_count: 2,
            reduced_text_chars: vec![5000, 3000],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub max_batch_ops: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_batch_ops: crate::traits::DEFAULT_MAX_BATCH_OPS,
        }
    }
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert_eq!(config.grouping.max_neighbors, 5);
        assert_eq!(config.grouping.eps, 0.25);
        assert_eq!(config.change_gate.bucket_boundaries, vec![3, 6, 9, 12]);
        assert_eq!(config.synthesis.calls_per_window, 50);
        assert_eq!(config.store.max_batch_ops, 450);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: FileConfig = toml::from_str(
            r#"
            [grouping]
            hot_groups = [12, 40]
            eps = 0.2

            [synthesis]
            max_workers = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.grouping.hot_groups, vec![12, 40]);
        assert_eq!(config.grouping.eps, 0.2);
        assert_eq!(config.grouping.merge_similarity, 0.7);
        assert_eq!(config.synthesis.max_workers, 2);
        assert_eq!(config.synthesis.window_secs, 60);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = toml::from_str::<FileConfig>("[grouping]\nepsilon = 0.3\n");
        assert!(err.is_err());
        let err = toml::from_str::<FileConfig>("[clustering]\n");
        assert!(err.is_err());
    }

    #[test]
    fn sample_config_matches_defaults() {
        let sample: FileConfig = toml::from_str(include_str!("../../../config/neutralnews.toml")).unwrap();
        let defaults = FileConfig::default();
        assert_eq!(sample.models.synthesis, defaults.models.synthesis);
        assert_eq!(sample.grouping.eps, defaults.grouping.eps);
        assert_eq!(sample.grouping.subdivision_min_size, defaults.grouping.subdivision_min_size);
        assert_eq!(sample.change_gate.bucket_boundaries, defaults.change_gate.bucket_boundaries);
        assert_eq!(sample.synthesis.reduced_text_chars, defaults.synthesis.reduced_text_chars);
        assert_eq!(sample.store.max_batch_ops, defaults.store.max_batch_ops);
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config(Path::new("/nonexistent/neutralnews.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
