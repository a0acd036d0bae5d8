// crates/energy-importance-core/src/error.rs

use thiserror::Error;

use crate::config::ConfigError;
use crate::features::FeatureError;
use crate::forest::ForestError;
use crate::report::ReportError;
use crate::split::SplitError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Input parsing failed: {0}")]
    Parser(#[from] energy_importance_parser::ParserError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Feature derivation failed: {0}")]
    Features(#[from] FeatureError),

    #[error("Train/test split failed: {0}")]
    Split(#[from] SplitError),

    #[error("Model fitting failed: {0}")]
    Forest(#[from] ForestError),

    #[error("Report generation failed: {0}")]
    Report(#[from] ReportError),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
