use super::{ForestParams, Hyperparameters, ModelFamily, SurrogateModel, TrainingError};
use crate::core::utils::stats;
use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::debug;

pub const RIDGE_ALPHAS: [f64; 5] = [1e-2, 1e-1, 1.0, 10.0, 100.0];
pub const FOREST_MAX_DEPTHS: [Option<usize>; 3] = [None, Some(4), Some(8)];
pub const FOREST_MIN_SAMPLES_LEAF: [usize; 2] = [1, 3];

/// Fold index for each of `n` rows: a seeded shuffle followed by round-robin assignment.
pub fn fold_assignment(n: usize, k: usize, seed: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);
    let mut folds = vec![0; n];
    for (position, &row) in order.iter().enumerate() {
        folds[row] = position % k.max(1);
    }
    folds
}

pub(crate) fn select_rows(x: &DMatrix<f64>, rows: &[usize]) -> DMatrix<f64> {
    x.select_rows(rows)
}

/// Hyperparameter grid searched when nothing is pinned.
pub fn grid(family: ModelFamily, n_trees: usize) -> Vec<Hyperparameters> {
    match family {
        ModelFamily::Ridge => RIDGE_ALPHAS
            .iter()
            .map(|&alpha| Hyperparameters::Ridge { alpha })
            .collect(),
        ModelFamily::RandomForest => FOREST_MAX_DEPTHS
            .iter()
            .flat_map(|&max_depth| {
                FOREST_MIN_SAMPLES_LEAF.iter().map(move |&min_samples_leaf| {
                    Hyperparameters::RandomForest(ForestParams {
                        n_trees,
                        max_depth,
                        min_samples_leaf,
                        max_features: None,
                    })
                })
            })
            .collect(),
    }
}

/// Mean squared error of `params` under k-fold cross-validation.
pub fn cross_validate(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    params: &Hyperparameters,
    folds: &[usize],
    k: usize,
    seed: u64,
) -> Result<f64, TrainingError> {
    let mut predicted = vec![0.0; y.len()];
    for fold in 0..k {
        let (test, train): (Vec<usize>, Vec<usize>) =
            (0..y.len()).partition(|&row| folds[row] == fold);
        if test.is_empty() || train.is_empty() {
            continue;
        }
        let x_train = select_rows(x, &train);
        let y_train = DVector::from_iterator(train.len(), train.iter().map(|&r| y[r]));
        let model = SurrogateModel::fit(&x_train, &y_train, params, seed.wrapping_add(fold as u64))?;
        let x_test = select_rows(x, &test);
        for (row, (mean, _)) in test.iter().zip(model.predict_rows(&x_test)) {
            predicted[*row] = mean;
        }
    }
    stats::mse(&predicted, y.as_slice())
        .ok_or_else(|| TrainingError::Numerical("cross-validation produced no predictions".into()))
}

/// Picks the grid point with the lowest cross-validated MSE; ties keep the earlier point.
pub fn select(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    candidates: &[Hyperparameters],
    k: usize,
    seed: u64,
) -> Result<(Hyperparameters, f64), TrainingError> {
    let folds = fold_assignment(y.len(), k, seed);
    let mut best: Option<(Hyperparameters, f64)> = None;
    for params in candidates {
        let score = cross_validate(x, y, params, &folds, k, seed)?;
        debug!(?params, mse = score, "Cross-validated grid point.");
        if best.as_ref().is_none_or(|(_, best_score)| score < *best_score) {
            best = Some((params.clone(), score));
        }
    }
    best.ok_or_else(|| TrainingError::InvalidHyperparameters("empty hyperparameter grid".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_are_balanced_and_reproducible() {
        let a = fold_assignment(10, 3, 42);
        let b = fold_assignment(10, 3, 42);
        assert_eq!(a, b);
        let mut counts = [0; 3];
        for fold in &a {
            counts[*fold] += 1;
        }
        assert_eq!(counts, [4, 3, 3]);
    }

    #[test]
    fn different_seeds_give_different_partitions() {
        assert_ne!(fold_assignment(20, 5, 1), fold_assignment(20, 5, 2));
    }

    #[test]
    fn grids_have_expected_sizes() {
        assert_eq!(grid(ModelFamily::Ridge, 10).len(), 5);
        assert_eq!(grid(ModelFamily::RandomForest, 10).len(), 6);
    }

    #[test]
    fn selection_prefers_lower_error() {
        // y = 2x exactly; the weakest penalty fits best
        let x = DMatrix::from_fn(12, 1, |r, _| r as f64);
        let y = DVector::from_fn(12, |r, _| 2.0 * r as f64);
        let (best, mse) = select(&x, &y, &grid(ModelFamily::Ridge, 0), 4, 7).unwrap();
        assert_eq!(best, Hyperparameters::Ridge { alpha: 1e-2 });
        assert!(mse < 1e-3);
    }

    #[test]
    fn ties_keep_the_earlier_grid_point() {
        // constant targets: every alpha predicts the same mean
        let x = DMatrix::from_fn(6, 2, |r, c| (r * (c + 1)) as f64);
        let y = DVector::from_element(6, 3.0);
        let candidates = vec![
            Hyperparameters::Ridge { alpha: 10.0 },
            Hyperparameters::Ridge { alpha: 1.0 },
        ];
        let (best, _) = select(&x, &y, &candidates, 3, 0).unwrap();
        assert_eq!(best, Hyperparameters::Ridge { alpha: 10.0 });
    }
}
