//! Regression tree grown on squared error

use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

use super::FeatureMatrix;

/// Growth limits for a single tree.
#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features drawn per split (`None` = all of them).
    pub max_features: Option<usize>,
}

#[derive(Debug, Clone)]
pub enum TreeNode {
    Leaf {
        value: f64,
        n_samples: usize,
    },
    Split {
        feature_idx: usize,
        threshold: f64,
        n_samples: usize,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    pub fn n_samples(&self) -> usize {
        match self {
            TreeNode::Leaf { n_samples, .. } | TreeNode::Split { n_samples, .. } => *n_samples,
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    pub fn n_leaves(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Split { left, right, .. } => left.n_leaves() + right.n_leaves(),
        }
    }
}

struct BestSplit {
    feature_idx: usize,
    threshold: f64,
    child_sse: f64,
}

#[derive(Debug, Clone)]
pub struct RegressionTree {
    root: TreeNode,
    /// Unnormalized sum of weighted squared-error decrease per feature.
    impurity_decrease: Vec<f64>,
}

impl RegressionTree {
    /// Grow a tree on the rows listed in `samples` (repeats allowed, as in a
    /// bootstrap draw).
    pub fn fit(
        data: &FeatureMatrix,
        samples: &[usize],
        params: &TreeParams,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let mut builder = Builder {
            data,
            params,
            impurity_decrease: vec![0.0; data.n_features()],
        };
        let mut samples = samples.to_vec();
        let root = builder.grow(&mut samples, 0, rng);
        Self {
            root,
            impurity_decrease: builder.impurity_decrease,
        }
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                TreeNode::Leaf { value, .. } => return *value,
                TreeNode::Split {
                    feature_idx,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    node = if row[*feature_idx] <= *threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }

    /// Per-feature share of this tree's total impurity decrease (sums to 1,
    /// or all zeros for a tree that never split).
    pub fn feature_importances(&self) -> Vec<f64> {
        let total: f64 = self.impurity_decrease.iter().sum();
        if total > 0.0 {
            self.impurity_decrease.iter().map(|v| v / total).collect()
        } else {
            vec![0.0; self.impurity_decrease.len()]
        }
    }

    pub fn root(&self) -> &TreeNode {
        &self.root
    }
}

struct Builder<'a> {
    data: &'a FeatureMatrix,
    params: &'a TreeParams,
    impurity_decrease: Vec<f64>,
}

impl Builder<'_> {
    fn grow(&mut self, samples: &mut [usize], depth: usize, rng: &mut ChaCha8Rng) -> TreeNode {
        let n = samples.len();
        let targets = &self.data.targets;
        let mean = samples.iter().map(|&i| targets[i]).sum::<f64>() / n as f64;
        let sse: f64 = samples.iter().map(|&i| (targets[i] - mean).powi(2)).sum();

        let depth_reached = self.params.max_depth.is_some_and(|max| depth >= max);
        if depth_reached
            || n < self.params.min_samples_split
            || n < 2 * self.params.min_samples_leaf
            || sse <= f64::EPSILON * n as f64
        {
            return TreeNode::Leaf {
                value: mean,
                n_samples: n,
            };
        }

        let Some(best) = self.best_split(samples, sse, rng) else {
            return TreeNode::Leaf {
                value: mean,
                n_samples: n,
            };
        };

        self.impurity_decrease[best.feature_idx] += sse - best.child_sse;

        let column = &self.data.columns[best.feature_idx];
        let split_at = partition_in_place(samples, |i| column[i] <= best.threshold);
        let (left, right) = samples.split_at_mut(split_at);

        let left = self.grow(left, depth + 1, rng);
        let right = self.grow(right, depth + 1, rng);

        TreeNode::Split {
            feature_idx: best.feature_idx,
            threshold: best.threshold,
            n_samples: n,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Scan every candidate feature in sorted order, keeping running sums so
    /// each threshold is scored in constant time.
    fn best_split(
        &self,
        samples: &[usize],
        parent_sse: f64,
        rng: &mut ChaCha8Rng,
    ) -> Option<BestSplit> {
        let n = samples.len();
        let min_leaf = self.params.min_samples_leaf;
        let targets = &self.data.targets;

        let mut features: Vec<usize> = (0..self.data.n_features()).collect();
        features.shuffle(rng);
        if let Some(max) = self.params.max_features {
            features.truncate(max.max(1));
        }

        let total_sum: f64 = samples.iter().map(|&i| targets[i]).sum();
        let total_sq: f64 = samples.iter().map(|&i| targets[i] * targets[i]).sum();

        let mut best: Option<BestSplit> = None;
        let mut order: Vec<usize> = samples.to_vec();

        for feature_idx in features {
            let column = &self.data.columns[feature_idx];
            order.copy_from_slice(samples);
            order.sort_by(|&a, &b| column[a].total_cmp(&column[b]));

            if column[order[0]] == column[order[n - 1]] {
                continue;
            }

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for pos in 1..n {
                let y = targets[order[pos - 1]];
                left_sum += y;
                left_sq += y * y;

                if pos < min_leaf || n - pos < min_leaf {
                    continue;
                }
                let lo = column[order[pos - 1]];
                let hi = column[order[pos]];
                if lo == hi {
                    continue;
                }

                let n_left = pos as f64;
                let n_right = (n - pos) as f64;
                let right_sum = total_sum - left_sum;
                let right_sq = total_sq - left_sq;
                let left_sse = (left_sq - left_sum * left_sum / n_left).max(0.0);
                let right_sse = (right_sq - right_sum * right_sum / n_right).max(0.0);
                let child_sse = left_sse + right_sse;

                if best.as_ref().map_or(true, |b| child_sse < b.child_sse) {
                    let mut threshold = lo + (hi - lo) / 2.0;
                    if threshold >= hi {
                        threshold = lo;
                    }
                    best = Some(BestSplit {
                        feature_idx,
                        threshold,
                        child_sse,
                    });
                }
            }
        }

        best.filter(|b| b.child_sse < parent_sse)
    }
}

/// Reorder `samples` so every element matching `goes_left` comes first;
/// returns the number of such elements.
fn partition_in_place(samples: &mut [usize], goes_left: impl Fn(usize) -> bool) -> usize {
    let mut boundary = 0;
    for pos in 0..samples.len() {
        if goes_left(samples[pos]) {
            samples.swap(boundary, pos);
            boundary += 1;
        }
    }
    boundary
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn params() -> TreeParams {
        TreeParams {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
        }
    }

    #[test]
    fn step_function_is_fit_exactly() {
        let x: Vec<f64> = (0..20).map(f64::from).collect();
        let noise: Vec<f64> = (0..20).map(|i| f64::from((i * 7) % 5)).collect();
        let y: Vec<f64> = x.iter().map(|&v| if v < 10.0 { 1.0 } else { 5.0 }).collect();
        let data = FeatureMatrix::from_columns(vec![noise, x], y);
        let samples: Vec<usize> = (0..20).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let tree = RegressionTree::fit(&data, &samples, &params(), &mut rng);

        assert_eq!(tree.root().n_leaves(), 2);
        assert_eq!(tree.predict_row(&[0.0, 3.0]), 1.0);
        assert_eq!(tree.predict_row(&[0.0, 12.0]), 5.0);
        assert_eq!(tree.predict_row(&[0.0, 9.5]), 1.0);
        assert_eq!(tree.predict_row(&[0.0, 10.0]), 5.0);

        let importances = tree.feature_importances();
        assert_eq!(importances, vec![0.0, 1.0]);
    }

    #[test]
    fn constant_target_stays_a_leaf() {
        let data = FeatureMatrix::from_columns(vec![vec![1.0, 2.0, 3.0]], vec![4.0, 4.0, 4.0]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let tree = RegressionTree::fit(&data, &[0, 1, 2], &params(), &mut rng);

        assert_eq!(tree.root().depth(), 1);
        assert_eq!(tree.predict_row(&[10.0]), 4.0);
        assert_eq!(tree.feature_importances(), vec![0.0]);
    }

    #[test]
    fn depth_limit_is_respected() {
        let x: Vec<f64> = (0..64).map(f64::from).collect();
        let y = x.clone();
        let data = FeatureMatrix::from_columns(vec![x], y);
        let samples: Vec<usize> = (0..64).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let limited = TreeParams {
            max_depth: Some(3),
            ..params()
        };

        let tree = RegressionTree::fit(&data, &samples, &limited, &mut rng);
        assert_eq!(tree.root().depth(), 4);
        assert!(tree.root().n_leaves() <= 8);
    }

    #[test]
    fn min_samples_leaf_bounds_every_leaf() {
        let x: Vec<f64> = (0..30).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|v| (v * 0.7).sin()).collect();
        let data = FeatureMatrix::from_columns(vec![x], y);
        let samples: Vec<usize> = (0..30).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let leafy = TreeParams {
            min_samples_leaf: 4,
            ..params()
        };

        let tree = RegressionTree::fit(&data, &samples, &leafy, &mut rng);

        fn check(node: &TreeNode) {
            match node {
                TreeNode::Leaf { n_samples, .. } => assert!(*n_samples >= 4),
                TreeNode::Split { left, right, .. } => {
                    check(left);
                    check(right);
                }
            }
        }
        check(tree.root());
    }

    #[test]
    fn partition_moves_matches_to_the_front() {
        let mut samples = vec![5, 2, 8, 1, 9, 4];
        let boundary = partition_in_place(&mut samples, |i| i < 5);
        assert_eq!(boundary, 3);
        let mut left = samples[..boundary].to_vec();
        left.sort_unstable();
        assert_eq!(left, vec![1, 2, 4]);
    }
}
