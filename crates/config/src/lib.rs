//! Configuration loading, validation, and management for lectag.
//!
//! Loads configuration from `~/.lectag/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.lectag/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Embedding collaborator settings
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Prototype building and threshold calibration
    #[serde(default)]
    pub prototypes: PrototypeConfig,

    /// Candidate shortlisting for the reasoning step
    #[serde(default)]
    pub shortlist: ShortlistConfig,

    /// Ensemble combination of reasoning and prototype scores
    #[serde(default)]
    pub ensemble: EnsembleConfig,

    /// Category reasoning fan-out
    #[serde(default)]
    pub reasoning: ReasoningConfig,

    /// On-disk prototype archive
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Batch suggestion settings
    #[serde(default)]
    pub batch: BatchConfig,
}

fn default_true() -> bool {
    true
}

/// Embedding collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Expected vector length; unset accepts whatever the active set uses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,

    /// Texts per `embed_batch` call during training
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_embedding_batch_size() -> usize {
    512
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: None,
            batch_size: default_embedding_batch_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Prototype construction and calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrototypeConfig {
    /// Tags with fewer examples than this get a blended centroid
    #[serde(default = "default_low_data_threshold")]
    pub low_data_threshold: usize,

    #[serde(default = "default_prototype_weight")]
    pub prototype_weight: f32,

    #[serde(default = "default_label_weight")]
    pub label_weight: f32,

    /// Precision a calibrated threshold must reach on the holdout set
    #[serde(default = "default_target_precision")]
    pub target_precision: f32,

    /// Threshold used when calibration cannot reach the target
    #[serde(default = "default_threshold")]
    pub default_threshold: f32,

    /// Without an explicit holdout, examples past this fraction of the
    /// input calibrate the thresholds
    #[serde(default = "default_train_holdout_split")]
    pub train_holdout_split: f32,

    /// Published versions kept in memory (0 = keep all)
    #[serde(default = "default_max_retained_versions")]
    pub max_retained_versions: usize,
}

fn default_low_data_threshold() -> usize {
    5
}
fn default_prototype_weight() -> f32 {
    0.8
}
fn default_label_weight() -> f32 {
    0.2
}
fn default_target_precision() -> f32 {
    0.90
}
fn default_threshold() -> f32 {
    0.60
}
fn default_train_holdout_split() -> f32 {
    0.8
}
fn default_max_retained_versions() -> usize {
    8
}

impl Default for PrototypeConfig {
    fn default() -> Self {
        Self {
            low_data_threshold: default_low_data_threshold(),
            prototype_weight: default_prototype_weight(),
            label_weight: default_label_weight(),
            target_precision: default_target_precision(),
            default_threshold: default_threshold(),
            train_holdout_split: default_train_holdout_split(),
            max_retained_versions: default_max_retained_versions(),
        }
    }
}

/// Shortlist sizing and must-include thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortlistConfig {
    #[serde(default = "default_k_proto")]
    pub k_proto: usize,

    #[serde(default = "default_k_label")]
    pub k_label: usize,

    #[serde(default = "default_k_prior")]
    pub k_prior: usize,

    /// Tags at or above this prototype similarity are always included
    #[serde(default = "default_proto_threshold")]
    pub proto_threshold: f32,

    /// Tags at or above this label similarity are always included
    #[serde(default = "default_label_threshold")]
    pub label_threshold: f32,

    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    /// Below this best similarity (and with no keyword hit) a document is hard
    #[serde(default = "default_hard_threshold")]
    pub hard_threshold: f32,

    #[serde(default = "default_hard_expansion")]
    pub hard_expansion: usize,

    #[serde(default = "default_hard_max_candidates")]
    pub hard_max_candidates: usize,

    /// Shortlists smaller than this are topped up by similarity
    #[serde(default = "default_min_size")]
    pub min_size: usize,
}

fn default_k_proto() -> usize {
    12
}
fn default_k_label() -> usize {
    10
}
fn default_k_prior() -> usize {
    5
}
fn default_proto_threshold() -> f32 {
    0.42
}
fn default_label_threshold() -> f32 {
    0.46
}
fn default_max_candidates() -> usize {
    25
}
fn default_hard_threshold() -> f32 {
    0.55
}
fn default_hard_expansion() -> usize {
    20
}
fn default_hard_max_candidates() -> usize {
    40
}
fn default_min_size() -> usize {
    20
}

impl Default for ShortlistConfig {
    fn default() -> Self {
        Self {
            k_proto: default_k_proto(),
            k_label: default_k_label(),
            k_prior: default_k_prior(),
            proto_threshold: default_proto_threshold(),
            label_threshold: default_label_threshold(),
            max_candidates: default_max_candidates(),
            hard_threshold: default_hard_threshold(),
            hard_expansion: default_hard_expansion(),
            hard_max_candidates: default_hard_max_candidates(),
            min_size: default_min_size(),
        }
    }
}

/// Ensemble weights, bonus and output sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    #[serde(default = "default_reasoning_weight")]
    pub reasoning_weight: f32,

    #[serde(default = "default_ensemble_prototype_weight")]
    pub prototype_weight: f32,

    #[serde(default = "default_agreement_bonus")]
    pub agreement_bonus: f32,

    /// How far below its threshold a prototype may sit and still earn the bonus
    #[serde(default = "default_agreement_margin")]
    pub agreement_margin: f32,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_min_k")]
    pub min_k: usize,

    /// Survivors below this combined score are dropped unless needed for min_k
    #[serde(default)]
    pub min_combined_score: f32,

    /// Threshold reported for tags that have no prototype
    #[serde(default = "default_threshold")]
    pub default_threshold: f32,
}

fn default_reasoning_weight() -> f32 {
    0.8
}
fn default_ensemble_prototype_weight() -> f32 {
    0.2
}
fn default_agreement_bonus() -> f32 {
    0.15
}
fn default_agreement_margin() -> f32 {
    0.03
}
fn default_top_k() -> usize {
    7
}
fn default_min_k() -> usize {
    3
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            reasoning_weight: default_reasoning_weight(),
            prototype_weight: default_ensemble_prototype_weight(),
            agreement_bonus: default_agreement_bonus(),
            agreement_margin: default_agreement_margin(),
            top_k: default_top_k(),
            min_k: default_min_k(),
            min_combined_score: 0.0,
            default_threshold: default_threshold(),
        }
    }
}

/// Category reasoning fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Concurrent category calls per document
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_workers() -> usize {
    5
}

impl ReasoningConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_workers: default_max_workers(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// SQLite prototype archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_archive_path")]
    pub path: PathBuf,
}

fn default_archive_path() -> PathBuf {
    AppConfig::config_dir().join("prototypes.db")
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_archive_path(),
        }
    }
}

/// Batch suggestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Documents processed concurrently
    #[serde(default = "default_batch_concurrency")]
    pub concurrency: usize,
}

fn default_batch_concurrency() -> usize {
    4
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_batch_concurrency(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.lectag/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `LECTAG_ARCHIVE_PATH`
    /// - `LECTAG_EMBEDDING_DIMENSIONS`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(path) = std::env::var("LECTAG_ARCHIVE_PATH") {
            config.archive.path = PathBuf::from(path);
        }

        if let Ok(raw) = std::env::var("LECTAG_EMBEDDING_DIMENSIONS") {
            let dimensions = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "LECTAG_EMBEDDING_DIMENSIONS must be a positive integer (got {raw:?})"
                ))
            })?;
            config.embedding.dimensions = Some(dimensions);
            config.validate()?;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".lectag")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.prototypes;
        check_unit("prototypes.prototype_weight", p.prototype_weight)?;
        check_unit("prototypes.label_weight", p.label_weight)?;
        if (p.prototype_weight + p.label_weight - 1.0).abs() > 1e-4 {
            return Err(ConfigError::ValidationError(
                "prototypes.prototype_weight + prototypes.label_weight must equal 1.0".into(),
            ));
        }
        if p.target_precision <= 0.0 || p.target_precision > 1.0 {
            return Err(ConfigError::ValidationError(
                "prototypes.target_precision must be in (0.0, 1.0]".into(),
            ));
        }
        check_unit("prototypes.default_threshold", p.default_threshold)?;
        if p.train_holdout_split <= 0.0 || p.train_holdout_split > 1.0 {
            return Err(ConfigError::ValidationError(
                "prototypes.train_holdout_split must be in (0.0, 1.0]".into(),
            ));
        }

        let s = &self.shortlist;
        check_unit("shortlist.proto_threshold", s.proto_threshold)?;
        check_unit("shortlist.label_threshold", s.label_threshold)?;
        check_unit("shortlist.hard_threshold", s.hard_threshold)?;
        if s.max_candidates == 0 || s.hard_max_candidates < s.max_candidates {
            return Err(ConfigError::ValidationError(
                "shortlist.max_candidates must be >= 1 and <= shortlist.hard_max_candidates".into(),
            ));
        }

        let e = &self.ensemble;
        check_unit("ensemble.reasoning_weight", e.reasoning_weight)?;
        check_unit("ensemble.prototype_weight", e.prototype_weight)?;
        check_unit("ensemble.agreement_bonus", e.agreement_bonus)?;
        check_unit("ensemble.agreement_margin", e.agreement_margin)?;
        check_unit("ensemble.min_combined_score", e.min_combined_score)?;
        check_unit("ensemble.default_threshold", e.default_threshold)?;
        if e.top_k == 0 {
            return Err(ConfigError::ValidationError("ensemble.top_k must be >= 1".into()));
        }
        if e.min_k > e.top_k {
            return Err(ConfigError::ValidationError(
                "ensemble.min_k must not exceed ensemble.top_k".into(),
            ));
        }

        if self.reasoning.max_workers == 0 {
            return Err(ConfigError::ValidationError(
                "reasoning.max_workers must be >= 1".into(),
            ));
        }
        if self.embedding.dimensions == Some(0) {
            return Err(ConfigError::ValidationError(
                "embedding.dimensions must be >= 1 when set".into(),
            ));
        }
        if self.embedding.batch_size == 0 || self.batch.concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.batch_size and batch.concurrency must be >= 1".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn check_unit(name: &str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "{name} must be between 0.0 and 1.0 (got {value})"
        )))
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.prototypes.low_data_threshold, 5);
        assert_eq!(config.ensemble.top_k, 7);
        assert_eq!(config.ensemble.min_k, 3);
        assert_eq!(config.reasoning.max_workers, 5);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.shortlist.k_proto, config.shortlist.k_proto);
        assert_eq!(parsed.ensemble.agreement_bonus, config.ensemble.agreement_bonus);
        assert_eq!(parsed.archive.path, config.archive.path);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let toml_str = r#"
[ensemble]
top_k = 5

[prototypes]
target_precision = 0.95
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.ensemble.top_k, 5);
        assert_eq!(config.ensemble.min_k, 3);
        assert_eq!(config.prototypes.target_precision, 0.95);
        assert_eq!(config.prototypes.default_threshold, 0.60);
        assert_eq!(config.shortlist.max_candidates, 25);
    }

    #[test]
    fn unbalanced_blend_weights_rejected() {
        let mut config = AppConfig::default();
        config.prototypes.label_weight = 0.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must equal 1.0"));
    }

    #[test]
    fn embedding_dimensions_read_from_file() {
        let config: AppConfig = toml::from_str("[embedding]\ndimensions = 1536\n").unwrap();
        assert_eq!(config.embedding.dimensions, Some(1536));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_embedding_dimensions_rejected() {
        let mut config = AppConfig::default();
        config.embedding.dimensions = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn min_k_above_top_k_rejected() {
        let mut config = AppConfig::default();
        config.ensemble.min_k = 9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_target_precision_rejected() {
        let mut config = AppConfig::default();
        config.prototypes.target_precision = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        let config = result.unwrap();
        assert_eq!(config.embedding.dimensions, None);
    }

    #[test]
    fn invalid_file_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[ensemble]\ntop_k = 0\n").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[ensemble\ntop_k = ").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("text-embedding-3-large"));
        assert!(toml_str.contains("agreement_bonus"));
    }
}
