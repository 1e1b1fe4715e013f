//! Surrogate fitness models.
//!
//! [`fit`] turns `(embedding, score)` pairs into an immutable [`ModelSnapshot`];
//! [`predict`] scores new embeddings with it. Hyperparameters that are not pinned in the
//! [`TrainerConfig`] are chosen by seeded k-fold cross-validation over a fixed grid.

pub mod forest;
pub mod ridge;
pub mod validation;

use crate::core::models::ids::VariantId;
use crate::engine::config::TrainerConfig;
use crate::engine::embedding::Embedding;
use forest::ForestModel;
use nalgebra::{DMatrix, DVector};
use ridge::RidgeModel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrainingError {
    #[error("Not enough labeled variants to train: {available} available, {required} required")]
    DataInsufficiency { available: usize, required: usize },

    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Invalid hyperparameters: {0}")]
    InvalidHyperparameters(String),

    #[error("Numerical failure: {0}")]
    Numerical(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ModelFamily {
    #[default]
    Ridge,
    RandomForest,
}

impl ModelFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelFamily::Ridge => "ridge",
            ModelFamily::RandomForest => "random-forest",
        }
    }

    /// Whether predictions carry a model-derived uncertainty.
    pub fn supports_uncertainty(self) -> bool {
        matches!(self, ModelFamily::RandomForest)
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ridge" => Ok(ModelFamily::Ridge),
            "random-forest" | "random_forest" | "forest" | "rf" => Ok(ModelFamily::RandomForest),
            other => Err(format!(
                "unknown model family '{other}' (expected ridge or random-forest)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: Option<usize>,
    pub min_samples_leaf: usize,
    /// Features considered per split; one third of the dimension when `None`.
    pub max_features: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Hyperparameters {
    Ridge { alpha: f64 },
    RandomForest(ForestParams),
}

impl Hyperparameters {
    pub fn family(&self) -> ModelFamily {
        match self {
            Hyperparameters::Ridge { .. } => ModelFamily::Ridge,
            Hyperparameters::RandomForest(_) => ModelFamily::RandomForest,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Hyperparameters::Ridge { alpha } if !(alpha.is_finite() && *alpha > 0.0) => {
                Err(format!("ridge alpha must be positive, got {alpha}"))
            }
            Hyperparameters::RandomForest(p) if p.n_trees == 0 => {
                Err("random forest needs at least one tree".to_string())
            }
            Hyperparameters::RandomForest(p) if p.min_samples_leaf == 0 => {
                Err("min_samples_leaf must be at least 1".to_string())
            }
            Hyperparameters::RandomForest(ForestParams {
                max_features: Some(0),
                ..
            }) => Err("max_features must be at least 1".to_string()),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Hyperparameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hyperparameters::Ridge { alpha } => write!(f, "alpha={alpha}"),
            Hyperparameters::RandomForest(p) => {
                write!(f, "n_trees={} max_depth=", p.n_trees)?;
                match p.max_depth {
                    Some(d) => write!(f, "{d}")?,
                    None => f.write_str("none")?,
                }
                write!(f, " min_samples_leaf={}", p.min_samples_leaf)
            }
        }
    }
}

/// How the uncertainty attached to a prediction was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UncertaintyKind {
    /// A fixed width (cross-validated RMSE) shared by every prediction.
    Placeholder,
    /// Standard deviation across ensemble members.
    EnsembleStd,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub mean: f64,
    pub uncertainty: f64,
    pub kind: UncertaintyKind,
}

#[derive(Debug, Clone)]
pub struct TrainingPoint {
    pub variant: VariantId,
    pub embedding: Embedding,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub enum SurrogateModel {
    Ridge(RidgeModel),
    Forest(ForestModel),
}

impl SurrogateModel {
    pub fn fit(
        x: &DMatrix<f64>,
        y: &DVector<f64>,
        params: &Hyperparameters,
        seed: u64,
    ) -> Result<Self, TrainingError> {
        match params {
            Hyperparameters::Ridge { alpha } => Ok(Self::Ridge(RidgeModel::fit(x, y, *alpha)?)),
            Hyperparameters::RandomForest(p) => {
                Ok(Self::Forest(ForestModel::fit(x, y.as_slice(), p, seed)?))
            }
        }
    }

    /// Mean and native spread (zero for models without one) for every row.
    pub fn predict_rows(&self, x: &DMatrix<f64>) -> Vec<(f64, f64)> {
        match self {
            SurrogateModel::Ridge(model) => model.predict(x).iter().map(|m| (*m, 0.0)).collect(),
            SurrogateModel::Forest(model) => {
                #[cfg(feature = "parallel")]
                let rows = (0..x.nrows()).into_par_iter();
                #[cfg(not(feature = "parallel"))]
                let rows = 0..x.nrows();
                rows.map(|row| model.predict_row(x, row)).collect()
            }
        }
    }

    pub fn supports_uncertainty(&self) -> bool {
        matches!(self, SurrogateModel::Forest(_))
    }
}

/// A fitted model together with everything needed to interpret it. Never mutated.
#[derive(Debug, Clone)]
pub struct ModelSnapshot {
    pub model: SurrogateModel,
    pub hyperparameters: Hyperparameters,
    /// Variants the model was trained on, in training order.
    pub labeled: Vec<VariantId>,
    pub dim: usize,
    /// Cross-validated mean squared error, when cross-validation ran.
    pub cv_mse: Option<f64>,
    pub training_rmse: f64,
}

impl ModelSnapshot {
    pub fn family(&self) -> ModelFamily {
        self.hyperparameters.family()
    }

    pub fn supports_uncertainty(&self) -> bool {
        self.model.supports_uncertainty()
    }

    /// Fixed width reported by models without native uncertainty.
    pub fn placeholder_width(&self) -> f64 {
        self.cv_mse.map(f64::sqrt).unwrap_or(self.training_rmse)
    }
}

fn design_matrix(embeddings: &[Embedding], dim: usize) -> Result<DMatrix<f64>, TrainingError> {
    if let Some(bad) = embeddings.iter().find(|e| e.dim() != dim) {
        return Err(TrainingError::DimensionMismatch {
            expected: dim,
            found: bad.dim(),
        });
    }
    Ok(DMatrix::from_fn(embeddings.len(), dim, |r, c| {
        embeddings[r].as_slice()[c] as f64
    }))
}

/// Fits a surrogate on parallel slices of embeddings and scores.
///
/// # Errors
///
/// - [`TrainingError::DataInsufficiency`] with fewer than `config.min_labeled` points
/// - [`TrainingError::DimensionMismatch`] when the slices differ in length or the
///   embeddings differ in dimension
pub fn fit(
    embeddings: &[Embedding],
    labels: &[f64],
    config: &TrainerConfig,
) -> Result<ModelSnapshot, TrainingError> {
    if embeddings.len() != labels.len() {
        return Err(TrainingError::DimensionMismatch {
            expected: labels.len(),
            found: embeddings.len(),
        });
    }
    let required = config.min_labeled.max(2);
    if labels.len() < required {
        return Err(TrainingError::DataInsufficiency {
            available: labels.len(),
            required,
        });
    }
    if labels.iter().any(|v| !v.is_finite()) || embeddings.iter().any(|e| !e.is_finite()) {
        return Err(TrainingError::Numerical("training data contains non-finite values".into()));
    }

    let dim = embeddings[0].dim();
    let x = design_matrix(embeddings, dim)?;
    let y = DVector::from_column_slice(labels);
    let n = labels.len();
    let k = config.cv_folds.min(n);

    let (hyperparameters, cv_mse) = match &config.hyperparameters {
        Some(pinned) => {
            if pinned.family() != config.family {
                return Err(TrainingError::InvalidHyperparameters(format!(
                    "pinned hyperparameters are for {}, trainer family is {}",
                    pinned.family(),
                    config.family
                )));
            }
            pinned.validate().map_err(TrainingError::InvalidHyperparameters)?;
            let score = if k >= 2 {
                let folds = validation::fold_assignment(n, k, config.seed);
                Some(validation::cross_validate(&x, &y, pinned, &folds, k, config.seed)?)
            } else {
                None
            };
            (pinned.clone(), score)
        }
        None => {
            let grid = validation::grid(config.family, config.n_trees);
            if k >= 2 {
                let (best, score) = validation::select(&x, &y, &grid, k, config.seed)?;
                (best, Some(score))
            } else {
                (grid[grid.len() / 2].clone(), None)
            }
        }
    };

    let model = SurrogateModel::fit(&x, &y, &hyperparameters, config.seed)?;
    let fitted: Vec<f64> = model.predict_rows(&x).into_iter().map(|(m, _)| m).collect();
    let training_rmse = crate::core::utils::stats::mse(&fitted, labels)
        .map(f64::sqrt)
        .unwrap_or(0.0);

    info!(
        family = %config.family,
        hyperparameters = %hyperparameters,
        samples = n,
        dim,
        cv_mse = ?cv_mse,
        training_rmse,
        "Surrogate model trained."
    );

    Ok(ModelSnapshot {
        model,
        hyperparameters,
        labeled: Vec::new(),
        dim,
        cv_mse,
        training_rmse,
    })
}

/// Fits on labeled points and records which variants the snapshot was trained on.
pub fn fit_points(points: &[TrainingPoint], config: &TrainerConfig) -> Result<ModelSnapshot, TrainingError> {
    let embeddings: Vec<Embedding> = points.iter().map(|p| p.embedding.clone()).collect();
    let labels: Vec<f64> = points.iter().map(|p| p.score).collect();
    let mut snapshot = fit(&embeddings, &labels, config)?;
    snapshot.labeled = points.iter().map(|p| p.variant).collect();
    Ok(snapshot)
}

/// Scores embeddings with a snapshot, attaching the snapshot's kind of uncertainty.
pub fn predict(snapshot: &ModelSnapshot, embeddings: &[Embedding]) -> Result<Vec<Prediction>, TrainingError> {
    if embeddings.is_empty() {
        return Ok(Vec::new());
    }
    let x = design_matrix(embeddings, snapshot.dim)?;
    let rows = snapshot.model.predict_rows(&x);
    let predictions = if snapshot.supports_uncertainty() {
        rows.into_iter()
            .map(|(mean, spread)| Prediction {
                mean,
                uncertainty: spread,
                kind: UncertaintyKind::EnsembleStd,
            })
            .collect()
    } else {
        let width = snapshot.placeholder_width();
        rows.into_iter()
            .map(|(mean, _)| Prediction {
                mean,
                uncertainty: width,
                kind: UncertaintyKind::Placeholder,
            })
            .collect()
    };
    debug!(count = embeddings.len(), "Scored embeddings.");
    Ok(predictions)
}

pub fn supports_uncertainty(family: ModelFamily) -> bool {
    family.supports_uncertainty()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_data(n: usize) -> (Vec<Embedding>, Vec<f64>) {
        let embeddings = (0..n)
            .map(|i| Embedding::new(vec![i as f32, (i % 2) as f32]))
            .collect();
        let labels = (0..n).map(|i| 0.5 * i as f64 + 1.0).collect();
        (embeddings, labels)
    }

    #[test]
    fn too_few_labels_is_data_insufficiency() {
        let (e, l) = linear_data(3);
        let err = fit(&e, &l, &TrainerConfig::default()).unwrap_err();
        assert_eq!(
            err,
            TrainingError::DataInsufficiency {
                available: 3,
                required: 5
            }
        );
    }

    #[test]
    fn mismatched_lengths_and_dimensions_are_rejected() {
        let (e, l) = linear_data(6);
        assert!(matches!(
            fit(&e[..5], &l, &TrainerConfig::default()),
            Err(TrainingError::DimensionMismatch { expected: 6, found: 5 })
        ));

        let mut ragged = e.clone();
        ragged[2] = Embedding::new(vec![1.0]);
        assert!(matches!(
            fit(&ragged, &l, &TrainerConfig::default()),
            Err(TrainingError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn ridge_predictions_carry_placeholder_uncertainty() {
        let (e, l) = linear_data(10);
        let snapshot = fit(&e, &l, &TrainerConfig::default()).unwrap();
        assert_eq!(snapshot.family(), ModelFamily::Ridge);
        assert!(snapshot.cv_mse.is_some());
        let predictions = predict(&snapshot, &[Embedding::new(vec![4.0, 0.0])]).unwrap();
        assert_eq!(predictions[0].kind, UncertaintyKind::Placeholder);
        assert!((predictions[0].mean - 3.0).abs() < 0.1);
        assert_eq!(predictions[0].uncertainty, snapshot.placeholder_width());
    }

    #[test]
    fn forest_predictions_carry_ensemble_spread() {
        let (e, l) = linear_data(12);
        let config = TrainerConfig {
            family: ModelFamily::RandomForest,
            n_trees: 20,
            ..Default::default()
        };
        let snapshot = fit(&e, &l, &config).unwrap();
        assert!(snapshot.supports_uncertainty());
        let predictions = predict(&snapshot, &e).unwrap();
        assert!(predictions.iter().all(|p| p.kind == UncertaintyKind::EnsembleStd));
        assert!(predictions.iter().all(|p| p.uncertainty >= 0.0));
        assert!(supports_uncertainty(ModelFamily::RandomForest));
        assert!(!supports_uncertainty(ModelFamily::Ridge));
    }

    #[test]
    fn training_is_reproducible_for_a_seed() {
        let (e, l) = linear_data(12);
        let config = TrainerConfig {
            family: ModelFamily::RandomForest,
            n_trees: 10,
            seed: 9,
            ..Default::default()
        };
        let a = predict(&fit(&e, &l, &config).unwrap(), &e).unwrap();
        let b = predict(&fit(&e, &l, &config).unwrap(), &e).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn pinned_hyperparameters_skip_the_search() {
        let (e, l) = linear_data(8);
        let config = TrainerConfig {
            hyperparameters: Some(Hyperparameters::Ridge { alpha: 3.0 }),
            ..Default::default()
        };
        let snapshot = fit(&e, &l, &config).unwrap();
        assert_eq!(snapshot.hyperparameters, Hyperparameters::Ridge { alpha: 3.0 });

        let wrong_family = TrainerConfig {
            family: ModelFamily::RandomForest,
            hyperparameters: Some(Hyperparameters::Ridge { alpha: 3.0 }),
            ..Default::default()
        };
        assert!(matches!(
            fit(&e, &l, &wrong_family),
            Err(TrainingError::InvalidHyperparameters(_))
        ));
    }

    #[test]
    fn prediction_checks_dimension() {
        let (e, l) = linear_data(6);
        let snapshot = fit(&e, &l, &TrainerConfig::default()).unwrap();
        assert!(matches!(
            predict(&snapshot, &[Embedding::new(vec![1.0, 2.0, 3.0])]),
            Err(TrainingError::DimensionMismatch { expected: 2, found: 3 })
        ));
    }

    #[test]
    fn fit_points_records_training_variants() {
        let (e, l) = linear_data(5);
        let points: Vec<TrainingPoint> = e
            .into_iter()
            .zip(l)
            .enumerate()
            .map(|(i, (embedding, score))| TrainingPoint {
                variant: VariantId(i * 2),
                embedding,
                score,
            })
            .collect();
        let snapshot = fit_points(&points, &TrainerConfig::default()).unwrap();
        assert_eq!(
            snapshot.labeled,
            vec![VariantId(0), VariantId(2), VariantId(4), VariantId(6), VariantId(8)]
        );
    }
}
