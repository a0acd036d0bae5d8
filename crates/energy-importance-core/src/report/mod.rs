mod chart;
mod glyphs;

pub use chart::{render_bar_chart, save_bar_chart, ChartLayout};

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use comfy_table::presets::UTF8_FULL;
use comfy_table::{CellAlignment, Table};
use serde::Serialize;
use thiserror::Error;

use crate::features::MissingValueReport;
use crate::forest::{ModelSummary, RegressionMetrics};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode chart {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("importance table has {names} names but {scores} scores")]
    LengthMismatch { names: usize, scores: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Importance scores sorted descending. Equal scores keep their schema order,
/// so the ordering is total and identical across runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportanceTable {
    pub entries: Vec<FeatureImportance>,
}

impl ImportanceTable {
    pub fn from_scores(names: &[String], scores: &[f64]) -> Result<Self, ReportError> {
        if names.len() != scores.len() {
            return Err(ReportError::LengthMismatch {
                names: names.len(),
                scores: scores.len(),
            });
        }

        let mut ranked: Vec<(usize, &String, f64)> = names
            .iter()
            .zip(scores)
            .enumerate()
            .map(|(idx, (name, &score))| (idx, name, score))
            .collect();
        ranked.sort_by(|a, b| match b.2.total_cmp(&a.2) {
            Ordering::Equal => a.0.cmp(&b.0),
            other => other,
        });

        Ok(Self {
            entries: ranked
                .into_iter()
                .map(|(_, name, importance)| FeatureImportance {
                    feature: name.clone(),
                    importance,
                })
                .collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn top(&self, n: usize) -> &[FeatureImportance] {
        &self.entries[..n.min(self.entries.len())]
    }

    pub fn get(&self, feature: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|entry| entry.feature == feature)
            .map(|entry| entry.importance)
    }

    pub fn to_json(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<(), ReportError> {
        fs::write(path, self.to_json()?).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

pub fn importance_table(table: &ImportanceTable, top_n: usize) -> Table {
    let mut out = Table::new();
    out.load_preset(UTF8_FULL)
        .set_header(vec!["Rank", "Feature", "Importance"]);
    for (rank, entry) in table.top(top_n).iter().enumerate() {
        out.add_row(vec![
            (rank + 1).to_string(),
            entry.feature.clone(),
            format!("{:.6}", entry.importance),
        ]);
    }
    if let Some(column) = out.column_mut(2) {
        column.set_cell_alignment(CellAlignment::Right);
    }
    out
}

pub fn missing_values_table(report: &MissingValueReport) -> Table {
    let mut out = Table::new();
    out.load_preset(UTF8_FULL)
        .set_header(vec!["Column", "Missing"]);
    for entry in &report.columns {
        out.add_row(vec![entry.column.clone(), entry.missing.to_string()]);
    }
    if let Some(column) = out.column_mut(1) {
        column.set_cell_alignment(CellAlignment::Right);
    }
    out
}

pub fn model_summary_table(summary: &ModelSummary) -> Table {
    let mut out = Table::new();
    out.load_preset(UTF8_FULL)
        .set_header(vec!["Partition", "Rows", "MSE", "RMSE", "MAE", "R^2"]);
    out.add_row(metrics_row("train", &summary.train));
    if let Some(test) = &summary.test {
        out.add_row(metrics_row("test", test));
    }
    if let Some(oob) = summary.oob_r2 {
        out.add_row(vec![
            "out-of-bag".to_string(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            format!("{oob:.4}"),
        ]);
    }
    out
}

fn metrics_row(label: &str, metrics: &RegressionMetrics) -> Vec<String> {
    vec![
        label.to_string(),
        metrics.samples.to_string(),
        format!("{:.4}", metrics.mse),
        format!("{:.4}", metrics.rmse),
        format!("{:.4}", metrics.mae),
        format!("{:.4}", metrics.r2),
    ]
}
