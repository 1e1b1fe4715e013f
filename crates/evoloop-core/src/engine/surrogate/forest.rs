use super::{ForestParams, TrainingError};
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn predict_row(&self, x: &DMatrix<f64>, row: usize) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if x[(row, *feature)] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

struct TreeBuilder<'d> {
    x: &'d DMatrix<f64>,
    y: &'d [f64],
    max_depth: Option<usize>,
    min_samples_leaf: usize,
    max_features: usize,
    rng: StdRng,
    nodes: Vec<Node>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    sse: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

impl TreeBuilder<'_> {
    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let index = self.nodes.len();
        let n = rows.len() as f64;
        let sum: f64 = rows.iter().map(|&r| self.y[r]).sum();
        let sum_sq: f64 = rows.iter().map(|&r| self.y[r] * self.y[r]).sum();
        let value = sum / n;
        self.nodes.push(Node::Leaf { value });

        let parent_sse = sum_sq - sum * sum / n;
        let depth_exhausted = self.max_depth.is_some_and(|max| depth >= max);
        if depth_exhausted || rows.len() < 2 * self.min_samples_leaf || parent_sse <= 1e-12 {
            return index;
        }

        let Some(best) = self.best_split(&rows) else {
            return index;
        };
        if best.sse >= parent_sse - 1e-12 {
            return index;
        }

        let left = self.grow(best.left, depth + 1);
        let right = self.grow(best.right, depth + 1);
        self.nodes[index] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        index
    }

    fn best_split(&mut self, rows: &[usize]) -> Option<BestSplit> {
        let p = self.x.ncols();
        // Features are visited in random order. After `max_features` of them the search
        // stops, unless no valid split has been found yet.
        let order = sample(&mut self.rng, p, p).into_vec();
        let leaf = self.min_samples_leaf.max(1);
        let mut best: Option<(usize, f64, f64)> = None;
        let mut sorted = rows.to_vec();

        for (visited, feature) in order.into_iter().enumerate() {
            if visited >= self.max_features && best.is_some() {
                break;
            }
            sorted.sort_by(|&a, &b| self.x[(a, feature)].total_cmp(&self.x[(b, feature)]));
            let total: f64 = sorted.iter().map(|&r| self.y[r]).sum();
            let total_sq: f64 = sorted.iter().map(|&r| self.y[r] * self.y[r]).sum();
            let (mut left_sum, mut left_sq) = (0.0, 0.0);
            for k in 1..sorted.len() {
                let moved = self.y[sorted[k - 1]];
                left_sum += moved;
                left_sq += moved * moved;
                if k < leaf || sorted.len() - k < leaf {
                    continue;
                }
                let lo = self.x[(sorted[k - 1], feature)];
                let hi = self.x[(sorted[k], feature)];
                if lo >= hi {
                    continue;
                }
                let (nl, nr) = (k as f64, (sorted.len() - k) as f64);
                let right_sum = total - left_sum;
                let sse = (left_sq - left_sum * left_sum / nl)
                    + (total_sq - left_sq - right_sum * right_sum / nr);
                if best.is_none_or(|(_, _, b)| sse < b) {
                    best = Some((feature, 0.5 * (lo + hi), sse));
                }
            }
        }

        let (feature, threshold, sse) = best?;
        let (left, right): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&r| self.x[(r, feature)] <= threshold);
        Some(BestSplit {
            feature,
            threshold,
            sse,
            left,
            right,
        })
    }
}

/// Bagged regression trees. Each tree sees a bootstrap resample and a random subset of
/// features at every split.
#[derive(Debug, Clone)]
pub struct ForestModel {
    trees: Vec<RegressionTree>,
    params: ForestParams,
}

fn tree_seed(seed: u64, tree: usize) -> u64 {
    seed ^ (tree as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

impl ForestModel {
    pub fn fit(
        x: &DMatrix<f64>,
        y: &[f64],
        params: &ForestParams,
        seed: u64,
    ) -> Result<Self, TrainingError> {
        let n = x.nrows();
        if n == 0 || y.len() != n {
            return Err(TrainingError::DimensionMismatch {
                expected: n,
                found: y.len(),
            });
        }
        if params.n_trees == 0 {
            return Err(TrainingError::InvalidHyperparameters(
                "a forest needs at least one tree".into(),
            ));
        }
        let max_features = params
            .max_features
            .unwrap_or_else(|| (x.ncols() / 3).max(1))
            .clamp(1, x.ncols().max(1));

        let fit_tree = |tree: usize| {
            let mut rng = StdRng::seed_from_u64(tree_seed(seed, tree));
            let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let mut builder = TreeBuilder {
                x,
                y,
                max_depth: params.max_depth,
                min_samples_leaf: params.min_samples_leaf.max(1),
                max_features,
                rng,
                nodes: Vec::new(),
            };
            builder.grow(rows, 0);
            RegressionTree {
                nodes: builder.nodes,
            }
        };

        #[cfg(feature = "parallel")]
        let trees: Vec<RegressionTree> = (0..params.n_trees).into_par_iter().map(fit_tree).collect();
        #[cfg(not(feature = "parallel"))]
        let trees: Vec<RegressionTree> = (0..params.n_trees).map(fit_tree).collect();

        Ok(Self {
            trees,
            params: params.clone(),
        })
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    /// Ensemble mean and standard deviation for one row of `x`.
    pub fn predict_row(&self, x: &DMatrix<f64>, row: usize) -> (f64, f64) {
        let count = self.trees.len() as f64;
        let values: Vec<f64> = self.trees.iter().map(|t| t.predict_row(x, row)).collect();
        let mean = values.iter().sum::<f64>() / count;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
        (mean, var.sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(n_trees: usize) -> ForestParams {
        ForestParams {
            n_trees,
            max_depth: None,
            min_samples_leaf: 1,
            max_features: None,
        }
    }

    fn step_data() -> (DMatrix<f64>, Vec<f64>) {
        let x = DMatrix::from_fn(20, 2, |r, c| if c == 0 { r as f64 } else { (r % 3) as f64 });
        let y = (0..20).map(|r| if r < 10 { 0.0 } else { 5.0 }).collect();
        (x, y)
    }

    #[test]
    fn learns_a_step_function() {
        let (x, y) = step_data();
        let forest = ForestModel::fit(&x, &y, &params(50), 3).unwrap();
        let (low, _) = forest.predict_row(&x, 2);
        let (high, _) = forest.predict_row(&x, 17);
        assert!(low < 1.0, "low = {low}");
        assert!(high > 4.0, "high = {high}");
    }

    #[test]
    fn same_seed_gives_identical_forests() {
        let (x, y) = step_data();
        let a = ForestModel::fit(&x, &y, &params(10), 11).unwrap();
        let b = ForestModel::fit(&x, &y, &params(10), 11).unwrap();
        for row in 0..20 {
            assert_eq!(a.predict_row(&x, row), b.predict_row(&x, row));
        }
    }

    #[test]
    fn single_tree_has_zero_spread() {
        let (x, y) = step_data();
        let forest = ForestModel::fit(&x, &y, &params(1), 0).unwrap();
        assert_eq!(forest.predict_row(&x, 5).1, 0.0);
    }

    #[test]
    fn depth_zero_predicts_bootstrap_means() {
        let (x, y) = step_data();
        let stump = ForestParams {
            max_depth: Some(0),
            ..params(5)
        };
        let forest = ForestModel::fit(&x, &y, &stump, 0).unwrap();
        let (first, _) = forest.predict_row(&x, 0);
        let (last, _) = forest.predict_row(&x, 19);
        assert_eq!(first, last);
    }

    #[test]
    fn rejects_empty_forest() {
        let (x, y) = step_data();
        assert!(matches!(
            ForestModel::fit(&x, &y, &params(0), 0),
            Err(TrainingError::InvalidHyperparameters(_))
        ));
    }
}
