// crates/energy-importance-core/src/pipeline.rs

use std::path::Path;

use polars::prelude::DataFrame;
use tracing::info;

use energy_importance_parser::{observations_from_frame, read_energy_csv, RawObservation};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::features::{
    drop_incomplete, engineer_features, export_features, feature_names, missing_value_report,
    EngineeredFeatures, MissingValueReport,
};
use crate::forest::{ForestError, ModelSummary, RandomForest};
use crate::report::{save_bar_chart, ChartLayout, ImportanceTable};
use crate::split::stratified_split;

/// Everything one analysis run produces, before anything is written to disk.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub engineered: Vec<EngineeredFeatures>,
    pub missing: MissingValueReport,
    pub rows_in: usize,
    pub rows_retained: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub summary: ModelSummary,
    pub importances: ImportanceTable,
}

pub struct ImportancePipeline {
    config: PipelineConfig,
}

impl ImportancePipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run_csv(&self, path: impl AsRef<Path>) -> Result<PipelineOutcome> {
        let observations = read_energy_csv(path)?;
        self.run(&observations)
    }

    pub fn run_frame(&self, df: &DataFrame) -> Result<PipelineOutcome> {
        let observations = observations_from_frame(df)?;
        self.run(&observations)
    }

    pub fn run(&self, observations: &[RawObservation]) -> Result<PipelineOutcome> {
        info!(rows = observations.len(), seed = self.config.seed, "starting importance run");

        // 1. derive features and count what is missing before the drop
        let engineered = engineer_features(observations);
        let missing = missing_value_report(&engineered)?;

        // 2. keep complete rows only
        let rows = drop_incomplete(&engineered);

        // 3. stratified train/test partition
        let split = stratified_split(&rows, &self.config.split, self.config.seed)?;

        // 4. fit the forest on the training partition
        let names = feature_names();
        let forest = RandomForest::fit(&self.config.forest, self.config.seed, names, &split.train)?;
        let summary = forest
            .summary(&split.train, &split.test)
            .ok_or(ForestError::EmptyTrainingSet)?;

        // 5. rank the predictors
        let importances = ImportanceTable::from_scores(names, forest.feature_importances())?;

        info!(
            retained_rows = rows.len(),
            train_rows = split.train.len(),
            test_rows = split.test.len(),
            train_r2 = summary.train.r2,
            test_r2 = summary.test.map_or(f64::NAN, |m| m.r2),
            "importance run complete"
        );

        Ok(PipelineOutcome {
            rows_in: observations.len(),
            rows_retained: rows.len(),
            train_rows: split.train.len(),
            test_rows: split.test.len(),
            engineered,
            missing,
            summary,
            importances,
        })
    }

    /// Write the chart plus whichever optional exports are configured.
    pub fn write_outputs(&self, outcome: &PipelineOutcome) -> Result<()> {
        let report = &self.config.report;
        save_bar_chart(&outcome.importances, &self.chart_layout(), &report.chart_path)?;

        if let Some(path) = &report.importance_json {
            outcome.importances.write_json(path)?;
            info!(path = %path.display(), "wrote importance table");
        }
        if let Some(path) = &report.features_out {
            export_features(&outcome.engineered, path)?;
        }
        Ok(())
    }

    pub fn chart_layout(&self) -> ChartLayout {
        ChartLayout {
            width: self.config.report.chart_width,
            height: self.config.report.chart_height,
            highlight: self.config.report.top_n,
            ..ChartLayout::default()
        }
    }
}
