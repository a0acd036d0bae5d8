pub mod config;
pub mod error;
pub mod features;
pub mod forest;
pub mod pipeline;
pub mod report;
pub mod split;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use energy_importance_parser as parser;
