use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::features::TrainingRow;

// absorbs representation error in `n * fraction` (0.2 * 15 is 3.0000000000000004)
const FRACTION_EPSILON: f64 = 1e-9;

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("test fraction must be in (0, 1), got {0}")]
    InvalidFraction(f64),
    #[error("at least one stratum is required")]
    NoStrata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub test_fraction: f64,
    /// Number of equal-count target quantile bins to stratify over.
    pub strata: usize,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            strata: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train: Vec<TrainingRow>,
    pub test: Vec<TrainingRow>,
}

/// Row positions assigned to each partition, both ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Stratified, seeded train/test partition of `rows` on their target.
pub fn stratified_split(
    rows: &[TrainingRow],
    config: &SplitConfig,
    seed: u64,
) -> Result<Split, SplitError> {
    let targets: Vec<f64> = rows.iter().map(|row| row.target).collect();
    let indices = stratified_indices(&targets, config, seed)?;

    let split = Split {
        train: indices.train.iter().map(|&i| rows[i].clone()).collect(),
        test: indices.test.iter().map(|&i| rows[i].clone()).collect(),
    };
    info!(
        train_rows = split.train.len(),
        test_rows = split.test.len(),
        strata = config.strata,
        seed,
        "partitioned rows"
    );
    Ok(split)
}

/// Rank `targets`, cut the ranking into equal-count bins, and draw the test
/// share of every bin with one seeded generator. Bins take
/// `floor(len * fraction)` rows each; the rows still needed to reach
/// `ceil(n * fraction)` go to the bins with the largest remainders.
pub fn stratified_indices(
    targets: &[f64],
    config: &SplitConfig,
    seed: u64,
) -> Result<SplitIndices, SplitError> {
    let fraction = config.test_fraction;
    if !(fraction > 0.0 && fraction < 1.0) {
        return Err(SplitError::InvalidFraction(fraction));
    }
    if config.strata == 0 {
        return Err(SplitError::NoStrata);
    }

    let n = targets.len();
    if n == 0 {
        return Ok(SplitIndices {
            train: Vec::new(),
            test: Vec::new(),
        });
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| targets[a].total_cmp(&targets[b]).then(a.cmp(&b)));

    let bin_count = config.strata.min(n);
    let bins: Vec<&[usize]> = (0..bin_count)
        .map(|b| &order[b * n / bin_count..(b + 1) * n / bin_count])
        .collect();

    let test_total = (((n as f64) * fraction - FRACTION_EPSILON).ceil() as usize).min(n);

    let mut quotas: Vec<usize> = Vec::with_capacity(bin_count);
    let mut remainders: Vec<(usize, f64)> = Vec::with_capacity(bin_count);
    for (b, bin) in bins.iter().enumerate() {
        let ideal = bin.len() as f64 * fraction;
        let base = ((ideal + FRACTION_EPSILON).floor() as usize).min(bin.len());
        quotas.push(base);
        remainders.push((b, ideal - base as f64));
    }
    remainders.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut outstanding = test_total.saturating_sub(quotas.iter().sum());
    for &(b, _) in &remainders {
        if outstanding == 0 {
            break;
        }
        if quotas[b] < bins[b].len() {
            quotas[b] += 1;
            outstanding -= 1;
        }
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut in_test = vec![false; n];
    for (bin, &quota) in bins.iter().zip(&quotas) {
        let mut members = bin.to_vec();
        members.shuffle(&mut rng);
        for &idx in members.iter().take(quota) {
            in_test[idx] = true;
        }
    }

    let (test, train): (Vec<usize>, Vec<usize>) = (0..n).partition(|&idx| in_test[idx]);
    Ok(SplitIndices { train, test })
}
