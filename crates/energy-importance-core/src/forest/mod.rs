//! Random forest regressor with impurity-based feature importance

mod tree;

pub use tree::{RegressionTree, TreeNode, TreeParams};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::features::TrainingRow;

#[derive(Debug, Error)]
pub enum ForestError {
    #[error("training partition is empty")]
    EmptyTrainingSet,
    #[error("row {row}: {message}")]
    InvalidFeatures { row: usize, message: String },
    #[error("{names} feature names for {width} feature columns")]
    SchemaMismatch { names: usize, width: usize },
}

/// Ensemble settings. Defaults follow the usual random forest regressor
/// conventions: fully grown trees on bootstrap samples, every feature
/// considered at every split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: Option<usize>,
    pub bootstrap: bool,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            bootstrap: true,
        }
    }
}

impl ForestConfig {
    fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
            max_features: self.max_features,
        }
    }
}

/// Column-major copy of the predictors plus the response.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub(crate) columns: Vec<Vec<f64>>,
    pub(crate) targets: Vec<f64>,
}

impl FeatureMatrix {
    pub fn from_columns(columns: Vec<Vec<f64>>, targets: Vec<f64>) -> Self {
        Self { columns, targets }
    }

    /// Validates that every row has `width` finite predictors and a finite target.
    pub fn from_rows(rows: &[TrainingRow], width: usize) -> Result<Self, ForestError> {
        let mut columns = vec![Vec::with_capacity(rows.len()); width];
        let mut targets = Vec::with_capacity(rows.len());

        for (row_idx, row) in rows.iter().enumerate() {
            if row.features.len() != width {
                return Err(ForestError::InvalidFeatures {
                    row: row_idx,
                    message: format!(
                        "expected {width} predictors, found {}",
                        row.features.len()
                    ),
                });
            }
            if !row.target.is_finite() {
                return Err(ForestError::InvalidFeatures {
                    row: row_idx,
                    message: format!("target is not finite ({})", row.target),
                });
            }
            for (feature_idx, (column, &value)) in
                columns.iter_mut().zip(&row.features).enumerate()
            {
                if !value.is_finite() {
                    return Err(ForestError::InvalidFeatures {
                        row: row_idx,
                        message: format!("predictor {feature_idx} is not finite ({value})"),
                    });
                }
                column.push(value);
            }
            targets.push(row.target);
        }

        Ok(Self { columns, targets })
    }

    pub fn n_samples(&self) -> usize {
        self.targets.len()
    }

    pub fn n_features(&self) -> usize {
        self.columns.len()
    }
}

/// Error metrics for one partition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegressionMetrics {
    pub samples: usize,
    pub mse: f64,
    pub rmse: f64,
    pub mae: f64,
    /// Share of variance explained (R^2).
    pub r2: f64,
}

impl RegressionMetrics {
    pub fn compute(actual: &[f64], predicted: &[f64]) -> Option<Self> {
        if actual.is_empty() || actual.len() != predicted.len() {
            return None;
        }
        let n = actual.len() as f64;
        let mean = actual.iter().sum::<f64>() / n;

        let ss_res: f64 = actual
            .iter()
            .zip(predicted)
            .map(|(a, p)| (a - p).powi(2))
            .sum();
        let abs_err: f64 = actual.iter().zip(predicted).map(|(a, p)| (a - p).abs()).sum();
        let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();

        let r2 = if ss_tot > 0.0 {
            1.0 - ss_res / ss_tot
        } else if ss_res == 0.0 {
            1.0
        } else {
            0.0
        };

        let mse = ss_res / n;
        Some(Self {
            samples: actual.len(),
            mse,
            rmse: mse.sqrt(),
            mae: abs_err / n,
            r2,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSummary {
    pub n_trees: usize,
    pub n_features: usize,
    pub train: RegressionMetrics,
    pub test: Option<RegressionMetrics>,
    pub oob_r2: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct RandomForest {
    config: ForestConfig,
    seed: u64,
    trees: Vec<RegressionTree>,
    feature_names: Vec<String>,
    feature_importances: Vec<f64>,
    oob_r2: Option<f64>,
}

impl RandomForest {
    /// Fit the ensemble on `rows`. Tree `i` draws its bootstrap sample and its
    /// split-candidate order from `ChaCha8Rng` seeded with `seed + i`, so the
    /// fitted model depends only on the rows, their order, and the seed.
    pub fn fit(
        config: &ForestConfig,
        seed: u64,
        feature_names: &[String],
        rows: &[TrainingRow],
    ) -> Result<Self, ForestError> {
        if rows.is_empty() {
            return Err(ForestError::EmptyTrainingSet);
        }
        let width = rows[0].features.len();
        if width != feature_names.len() {
            return Err(ForestError::SchemaMismatch {
                names: feature_names.len(),
                width,
            });
        }
        let data = FeatureMatrix::from_rows(rows, width)?;
        let n = data.n_samples();
        let params = config.tree_params();

        let mut trees = Vec::with_capacity(config.n_trees);
        let mut oob_sum = vec![0.0; n];
        let mut oob_count = vec![0usize; n];

        for tree_idx in 0..config.n_trees {
            let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(tree_idx as u64));
            let samples: Vec<usize> = if config.bootstrap {
                (0..n).map(|_| rng.gen_range(0..n)).collect()
            } else {
                (0..n).collect()
            };

            let tree = RegressionTree::fit(&data, &samples, &params, &mut rng);

            if config.bootstrap {
                let mut in_bag = vec![false; n];
                for &i in &samples {
                    in_bag[i] = true;
                }
                for (i, bagged) in in_bag.iter().enumerate() {
                    if !bagged {
                        oob_sum[i] += tree.predict_row(&rows[i].features);
                        oob_count[i] += 1;
                    }
                }
            }

            debug!(
                tree = tree_idx,
                depth = tree.root().depth(),
                leaves = tree.root().n_leaves(),
                "grew tree"
            );
            trees.push(tree);
        }

        let feature_importances = average_importances(&trees, width);
        let oob_r2 = out_of_bag_r2(&data.targets, &oob_sum, &oob_count);

        info!(
            trees = trees.len(),
            samples = n,
            features = width,
            oob_r2 = oob_r2.unwrap_or(f64::NAN),
            "fitted random forest"
        );

        Ok(Self {
            config: config.clone(),
            seed,
            trees,
            feature_names: feature_names.to_vec(),
            feature_importances,
            oob_r2,
        })
    }

    pub fn predict_row(&self, features: &[f64]) -> f64 {
        let total: f64 = self.trees.iter().map(|t| t.predict_row(features)).sum();
        total / self.trees.len() as f64
    }

    pub fn predict(&self, rows: &[TrainingRow]) -> Vec<f64> {
        rows.iter().map(|row| self.predict_row(&row.features)).collect()
    }

    pub fn evaluate(&self, rows: &[TrainingRow]) -> Option<RegressionMetrics> {
        let actual: Vec<f64> = rows.iter().map(|row| row.target).collect();
        RegressionMetrics::compute(&actual, &self.predict(rows))
    }

    /// Metrics on the training rows (and on held-out rows when there are any).
    pub fn summary(&self, train: &[TrainingRow], test: &[TrainingRow]) -> Option<ModelSummary> {
        Some(ModelSummary {
            n_trees: self.trees.len(),
            n_features: self.feature_names.len(),
            train: self.evaluate(train)?,
            test: self.evaluate(test),
            oob_r2: self.oob_r2,
        })
    }

    /// Mean impurity decrease per feature, in `feature_names` order; sums to 1
    /// unless no tree ever split.
    pub fn feature_importances(&self) -> &[f64] {
        &self.feature_importances
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn oob_r2(&self) -> Option<f64> {
        self.oob_r2
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

fn average_importances(trees: &[RegressionTree], width: usize) -> Vec<f64> {
    let mut totals = vec![0.0; width];
    for tree in trees {
        for (total, imp) in totals.iter_mut().zip(tree.feature_importances()) {
            *total += imp;
        }
    }
    let count = trees.len() as f64;
    for total in &mut totals {
        *total /= count;
    }

    let sum: f64 = totals.iter().sum();
    if sum > 0.0 {
        for total in &mut totals {
            *total /= sum;
        }
    }
    totals
}

fn out_of_bag_r2(targets: &[f64], oob_sum: &[f64], oob_count: &[usize]) -> Option<f64> {
    let mut actual = Vec::with_capacity(targets.len());
    let mut predicted = Vec::with_capacity(targets.len());
    for ((&y, &sum), &count) in targets.iter().zip(oob_sum).zip(oob_count) {
        if count > 0 {
            actual.push(y);
            predicted.push(sum / count as f64);
        }
    }
    if actual.len() < 2 {
        return None;
    }
    RegressionMetrics::compute(&actual, &predicted).map(|metrics| metrics.r2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn rows(n: usize) -> Vec<TrainingRow> {
        let ts = NaiveDate::from_ymd_opt(2016, 1, 11)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        (0..n)
            .map(|i| {
                let x1 = i as f64 / 10.0;
                let x2 = ((i * 13) % 7) as f64;
                let x3 = ((i * 31) % 11) as f64;
                TrainingRow {
                    timestamp: ts,
                    target: 3.0 * x1 + 0.2 * x2,
                    features: vec![x1, x2, x3],
                }
            })
            .collect()
    }

    fn names() -> Vec<String> {
        vec!["x1".into(), "x2".into(), "x3".into()]
    }

    fn small_config() -> ForestConfig {
        ForestConfig {
            n_trees: 15,
            ..Default::default()
        }
    }

    #[test]
    fn importances_favour_the_driving_feature() {
        let data = rows(200);
        let forest = RandomForest::fit(&small_config(), 42, &names(), &data).expect("fit");

        assert_eq!(forest.n_trees(), 15);
        let importances = forest.feature_importances();
        assert_eq!(importances.len(), 3);
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(importances[0] > importances[1]);
        assert!(importances[0] > importances[2]);
        assert!(importances.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn fit_is_deterministic_for_a_seed() {
        let data = rows(120);
        let first = RandomForest::fit(&small_config(), 42, &names(), &data).expect("first");
        let second = RandomForest::fit(&small_config(), 42, &names(), &data).expect("second");
        assert_eq!(first.feature_importances(), second.feature_importances());
        assert_eq!(first.predict(&data), second.predict(&data));
        assert_eq!(first.oob_r2(), second.oob_r2());
    }

    #[test]
    fn summary_reports_train_and_test_metrics() {
        let data = rows(150);
        let (train, test) = data.split_at(120);
        let forest = RandomForest::fit(&small_config(), 42, &names(), train).expect("fit");
        let summary = forest.summary(train, test).expect("summary");

        assert_eq!(summary.n_trees, 15);
        assert_eq!(summary.n_features, 3);
        assert_eq!(summary.train.samples, 120);
        assert!(summary.train.r2 > 0.95);
        assert!((summary.train.rmse - summary.train.mse.sqrt()).abs() < 1e-12);
        let test_metrics = summary.test.expect("test metrics");
        assert_eq!(test_metrics.samples, 30);
        assert!(summary.oob_r2.is_some());

        assert!(forest.summary(train, &[]).expect("summary").test.is_none());
    }

    #[test]
    fn empty_training_set_fails() {
        let err = RandomForest::fit(&small_config(), 42, &names(), &[]).expect_err("empty");
        assert!(matches!(err, ForestError::EmptyTrainingSet));
    }

    #[test]
    fn non_finite_predictor_fails() {
        let mut data = rows(10);
        data[4].features[1] = f64::NAN;
        let err = RandomForest::fit(&small_config(), 42, &names(), &data).expect_err("nan");
        assert!(matches!(err, ForestError::InvalidFeatures { row: 4, .. }));
    }

    #[test]
    fn ragged_rows_fail() {
        let mut data = rows(10);
        data[7].features.pop();
        let err = RandomForest::fit(&small_config(), 42, &names(), &data).expect_err("ragged");
        assert!(matches!(err, ForestError::InvalidFeatures { row: 7, .. }));

        let err = RandomForest::fit(&small_config(), 42, &names()[..2], &rows(10))
            .expect_err("schema mismatch");
        assert!(matches!(err, ForestError::SchemaMismatch { names: 2, width: 3 }));
    }

    #[test]
    fn constant_target_yields_zero_importances() {
        let mut data = rows(40);
        for row in &mut data {
            row.target = 7.0;
        }
        let forest = RandomForest::fit(&small_config(), 42, &names(), &data).expect("fit");
        assert_eq!(forest.feature_importances(), &[0.0, 0.0, 0.0]);
        assert_eq!(forest.predict_row(&[1.0, 2.0, 3.0]), 7.0);
    }

    #[test]
    fn metrics_handle_perfect_and_constant_cases() {
        let perfect = RegressionMetrics::compute(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(perfect.mse, 0.0);
        assert_eq!(perfect.r2, 1.0);

        let constant = RegressionMetrics::compute(&[2.0, 2.0], &[1.0, 3.0]).unwrap();
        assert_eq!(constant.r2, 0.0);
        assert_eq!(constant.mae, 1.0);

        assert!(RegressionMetrics::compute(&[], &[]).is_none());
    }
}
