use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::forest::ForestConfig;
use crate::split::SplitConfig;

pub const DEFAULT_SEED: u64 = 42;
pub const CONFIG_ENV_VAR: &str = "ENERGY_IMPORTANCE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Settings for one analysis run. Every field has a default, so an empty TOML
/// document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Shared by the splitter and the forest.
    pub seed: u64,
    pub split: SplitConfig,
    pub forest: ForestConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub chart_path: PathBuf,
    pub chart_width: u32,
    pub chart_height: u32,
    pub top_n: usize,
    pub importance_json: Option<PathBuf>,
    pub features_out: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            split: SplitConfig::default(),
            forest: ForestConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        // 18 x 20 inches at 100 dpi
        Self {
            chart_path: PathBuf::from("feature_importance.png"),
            chart_width: 1800,
            chart_height: 2000,
            top_n: 10,
            importance_json: None,
            features_out: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fraction = self.split.test_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "split.test_fraction must be in (0, 1), got {fraction}"
            )));
        }
        if self.split.strata == 0 {
            return Err(ConfigError::Invalid("split.strata must be at least 1".into()));
        }
        if self.forest.n_trees == 0 {
            return Err(ConfigError::Invalid("forest.n_trees must be at least 1".into()));
        }
        if self.forest.min_samples_split < 2 {
            return Err(ConfigError::Invalid(
                "forest.min_samples_split must be at least 2".into(),
            ));
        }
        if self.forest.min_samples_leaf == 0 {
            return Err(ConfigError::Invalid(
                "forest.min_samples_leaf must be at least 1".into(),
            ));
        }
        if self.forest.max_features == Some(0) {
            return Err(ConfigError::Invalid(
                "forest.max_features must be at least 1 when set".into(),
            ));
        }
        if self.report.chart_width < 400 || self.report.chart_height < 200 {
            return Err(ConfigError::Invalid(format!(
                "chart must be at least 400x200 px, got {}x{}",
                self.report.chart_width, self.report.chart_height
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = PipelineConfig::from_toml_str("").expect("empty config");
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.seed, 42);
        assert_eq!(config.forest.n_trees, 100);
        assert!((config.split.test_fraction - 0.2).abs() < f64::EPSILON);
        assert_eq!(config.report.chart_path, PathBuf::from("feature_importance.png"));
        assert_eq!(config.report.top_n, 10);
    }

    #[test]
    fn partial_sections_override_only_named_fields() {
        let config = PipelineConfig::from_toml_str(
            r#"
            seed = 7

            [forest]
            n_trees = 12
            max_depth = 6

            [report]
            chart_path = "out/importance.png"
            "#,
        )
        .expect("partial config");

        assert_eq!(config.seed, 7);
        assert_eq!(config.forest.n_trees, 12);
        assert_eq!(config.forest.max_depth, Some(6));
        assert_eq!(config.forest.min_samples_leaf, 1);
        assert_eq!(config.split.strata, 10);
        assert_eq!(config.report.chart_path, PathBuf::from("out/importance.png"));
        assert_eq!(config.report.chart_width, 1800);
    }

    #[test]
    fn out_of_range_fraction_is_rejected() {
        let err = PipelineConfig::from_toml_str("[split]\ntest_fraction = 1.5\n")
            .expect_err("fraction above one");
        assert!(matches!(err, ConfigError::Invalid(message) if message.contains("test_fraction")));
    }

    #[test]
    fn unknown_types_surface_toml_errors() {
        let err = PipelineConfig::from_toml_str("seed = \"forty-two\"\n").expect_err("bad seed");
        assert!(matches!(err, ConfigError::Toml(_)));
    }
}
