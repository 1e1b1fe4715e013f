use super::TrainingError;
use nalgebra::{Cholesky, DMatrix, DVector};

/// L2-regularized least squares on centered features and targets.
///
/// Solved in the primal (`p x p`) when there are at least as many samples as features and
/// in the dual (`n x n`) otherwise, which is the common case for language-model
/// embeddings with few labels.
#[derive(Debug, Clone)]
pub struct RidgeModel {
    weights: DVector<f64>,
    intercept: f64,
    alpha: f64,
}

impl RidgeModel {
    pub fn fit(x: &DMatrix<f64>, y: &DVector<f64>, alpha: f64) -> Result<Self, TrainingError> {
        let (n, p) = x.shape();
        if n == 0 || y.len() != n {
            return Err(TrainingError::DimensionMismatch {
                expected: n,
                found: y.len(),
            });
        }

        let x_mean: DVector<f64> = x.row_mean().transpose();
        let y_mean = y.mean();
        let mut centered = x.clone();
        for (j, mut column) in centered.column_iter_mut().enumerate() {
            column.add_scalar_mut(-x_mean[j]);
        }
        let y_centered = y.add_scalar(-y_mean);

        let weights = if p <= n {
            let gram = centered.tr_mul(&centered) + DMatrix::identity(p, p) * alpha;
            let rhs = centered.tr_mul(&y_centered);
            solve_spd(gram, &rhs)?
        } else {
            let kernel = &centered * centered.transpose() + DMatrix::identity(n, n) * alpha;
            let dual = solve_spd(kernel, &y_centered)?;
            centered.tr_mul(&dual)
        };

        let intercept = y_mean - x_mean.dot(&weights);
        Ok(Self {
            weights,
            intercept,
            alpha,
        })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn dim(&self) -> usize {
        self.weights.len()
    }

    pub fn predict(&self, x: &DMatrix<f64>) -> DVector<f64> {
        (x * &self.weights).add_scalar(self.intercept)
    }
}

fn solve_spd(matrix: DMatrix<f64>, rhs: &DVector<f64>) -> Result<DVector<f64>, TrainingError> {
    let cholesky = Cholesky::new(matrix).ok_or_else(|| {
        TrainingError::Numerical("regularized system is not positive definite".into())
    })?;
    let solution = cholesky.solve(rhs);
    if solution.iter().all(|v| v.is_finite()) {
        Ok(solution)
    } else {
        Err(TrainingError::Numerical("ridge solution is not finite".into()))
    }
}
