use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::NeedScoopError;

/// TOML-backed pipeline configuration.
/// Secrets (API keys) stay as env vars. Every field has a default so an
/// empty file is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PipelineConfig {
    pub embedding: EmbeddingConfig,
    pub oracle: OracleConfig,
    pub clustering: ClusteringConfig,
    pub scoring: ScoringConfig,
    pub signals: SignalsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimensions: Option<usize>,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_ms: u64,
    pub max_in_flight: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimensions: None,
            batch_size: 100,
            max_attempts: 3,
            base_backoff_ms: 500,
            max_backoff_ms: 30_000,
            jitter_ms: 250,
            max_in_flight: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OracleConfig {
    pub model: String,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub sample_size: usize,
    pub sample_max_chars: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            max_attempts: 2,
            retry_delay_ms: 1_000,
            sample_size: 5,
            sample_max_chars: 280,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ClusteringConfig {
    pub min_cluster_size: usize,
    pub min_samples: usize,
    pub reduced_dimensions: usize,
    pub n_neighbors: usize,
    pub min_dist: f64,
    pub spread: f64,
    pub seed: u64,
    /// Layout epochs. Defaults to 500 for small corpora and 200 above 10k points.
    pub n_epochs: Option<usize>,
    pub negative_sample_rate: usize,
    pub selection_epsilon: f64,
    pub allow_single_cluster: bool,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: 10,
            min_samples: 5,
            reduced_dimensions: 50,
            n_neighbors: 15,
            min_dist: 0.1,
            spread: 1.0,
            seed: 42,
            n_epochs: None,
            negative_sample_rate: 5,
            selection_epsilon: 0.0,
            allow_single_cluster: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    pub growth_window_days: i64,
    pub volume_saturation: f64,
    pub engagement_saturation: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            growth_window_days: 7,
            volume_saturation: 1_000.0,
            engagement_saturation: 10_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScoringWeights {
    pub volume: f64,
    pub engagement: f64,
    pub growth: f64,
    pub clarity: f64,
    pub monetization: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            volume: 0.25,
            engagement: 0.20,
            growth: 0.20,
            clarity: 0.15,
            monetization: 0.20,
        }
    }
}

impl ScoringWeights {
    pub fn as_array(&self) -> [f64; 5] {
        [
            self.volume,
            self.engagement,
            self.growth,
            self.clarity,
            self.monetization,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SignalsConfig {
    pub rules_path: PathBuf,
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            rules_path: PathBuf::from("config/signals.toml"),
        }
    }
}

impl PipelineConfig {
    /// Reject configurations the pipeline cannot run with. Called before any
    /// processing starts.
    pub fn validate(&self) -> Result<(), NeedScoopError> {
        let e = &self.embedding;
        if e.model.trim().is_empty() {
            return Err(config_err("embedding.model must not be empty"));
        }
        if e.batch_size == 0 {
            return Err(config_err("embedding.batch_size must be at least 1"));
        }
        if e.max_attempts == 0 {
            return Err(config_err("embedding.max_attempts must be at least 1"));
        }
        if e.max_in_flight == 0 {
            return Err(config_err("embedding.max_in_flight must be at least 1"));
        }
        if e.base_backoff_ms > e.max_backoff_ms {
            return Err(config_err(
                "embedding.base_backoff_ms must not exceed embedding.max_backoff_ms",
            ));
        }
        if e.dimensions == Some(0) {
            return Err(config_err("embedding.dimensions must be positive"));
        }

        let o = &self.oracle;
        if o.max_attempts == 0 {
            return Err(config_err("oracle.max_attempts must be at least 1"));
        }
        if o.sample_max_chars == 0 {
            return Err(config_err("oracle.sample_max_chars must be positive"));
        }

        let c = &self.clustering;
        if c.min_cluster_size < 2 {
            return Err(config_err("clustering.min_cluster_size must be at least 2"));
        }
        if c.min_samples == 0 {
            return Err(config_err("clustering.min_samples must be at least 1"));
        }
        if c.reduced_dimensions == 0 {
            return Err(config_err("clustering.reduced_dimensions must be at least 1"));
        }
        if c.n_neighbors < 2 {
            return Err(config_err("clustering.n_neighbors must be at least 2"));
        }
        if !c.min_dist.is_finite() || c.min_dist < 0.0 {
            return Err(config_err("clustering.min_dist must be a non-negative number"));
        }
        if !c.spread.is_finite() || c.spread <= 0.0 || c.min_dist > c.spread {
            return Err(config_err(
                "clustering.spread must be positive and at least min_dist",
            ));
        }
        if c.n_epochs == Some(0) {
            return Err(config_err("clustering.n_epochs must be positive"));
        }
        if !c.selection_epsilon.is_finite() || c.selection_epsilon < 0.0 {
            return Err(config_err(
                "clustering.selection_epsilon must be a non-negative number",
            ));
        }

        let s = &self.scoring;
        let weights = s.weights.as_array();
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(config_err(
                "scoring.weights must be non-negative finite numbers",
            ));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(config_err(&format!(
                "scoring.weights must sum to 1.0 (got {sum})"
            )));
        }
        if s.growth_window_days <= 0 {
            return Err(config_err("scoring.growth_window_days must be positive"));
        }
        if !(s.volume_saturation.is_finite() && s.volume_saturation > 0.0) {
            return Err(config_err("scoring.volume_saturation must be positive"));
        }
        if !(s.engagement_saturation.is_finite() && s.engagement_saturation > 0.0) {
            return Err(config_err("scoring.engagement_saturation must be positive"));
        }

        Ok(())
    }
}

fn config_err(msg: &str) -> NeedScoopError {
    NeedScoopError::Config(msg.to_string())
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: PipelineConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}
