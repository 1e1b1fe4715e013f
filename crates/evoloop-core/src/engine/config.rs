use crate::engine::acquisition::AcquisitionPolicy;
use crate::engine::embedding::RepresentationMode;
use crate::engine::surrogate::{Hyperparameters, ModelFamily};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingConfig {
    pub mode: RepresentationMode,
    /// Maximum number of sequences per backend call.
    pub batch_size: usize,
    /// Optional token budget per backend call; each sequence costs its length plus one.
    pub max_tokens_per_batch: Option<usize>,
    /// Truncate sequences to this many residues before inference.
    pub truncate_to: Option<usize>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            mode: RepresentationMode::Mean,
            batch_size: 32,
            max_tokens_per_batch: None,
            truncate_to: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// SQLite file backing the cache. `None` keeps the cache in memory only.
    pub path: Option<PathBuf>,
    /// Degrade to in-memory operation instead of failing when the store is unusable.
    pub tolerate_store_failure: bool,
    /// Number of unpersisted entries that triggers an automatic flush.
    pub flush_threshold: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            tolerate_store_failure: true,
            flush_threshold: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainerConfig {
    pub family: ModelFamily,
    /// Pinned hyperparameters; cross-validation chooses them when `None`.
    pub hyperparameters: Option<Hyperparameters>,
    pub n_trees: usize,
    pub min_labeled: usize,
    pub cv_folds: usize,
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            family: ModelFamily::Ridge,
            hyperparameters: None,
            n_trees: 100,
            min_labeled: 5,
            cv_folds: 5,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionConfig {
    pub policy: AcquisitionPolicy,
    /// Variants recommended per round.
    pub batch_size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceConfig {
    pub improvement_tolerance: f64,
    pub patience_rounds: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoppingConfig {
    /// Total number of variants the campaign may select.
    pub budget: usize,
    pub convergence: Option<ConvergenceConfig>,
}

/// What a round does when earlier selections are still unlabeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingPolicy {
    /// Refuse to start the round.
    #[default]
    RequireAll,
    /// Train on what is labeled; unresolved selections stay pending.
    AllowPartial,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CampaignConfig {
    pub embedding: EmbeddingConfig,
    pub trainer: TrainerConfig,
    pub acquisition: AcquisitionConfig,
    pub stopping: StoppingConfig,
    pub pending_policy: PendingPolicy,
}

#[derive(Default)]
pub struct CampaignConfigBuilder {
    embedding: Option<EmbeddingConfig>,
    trainer: Option<TrainerConfig>,
    policy: Option<AcquisitionPolicy>,
    batch_size: Option<usize>,
    budget: Option<usize>,
    convergence: Option<ConvergenceConfig>,
    pending_policy: Option<PendingPolicy>,
}

impl CampaignConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn embedding(mut self, embedding: EmbeddingConfig) -> Self {
        self.embedding = Some(embedding);
        self
    }
    pub fn trainer(mut self, trainer: TrainerConfig) -> Self {
        self.trainer = Some(trainer);
        self
    }
    pub fn policy(mut self, policy: AcquisitionPolicy) -> Self {
        self.policy = Some(policy);
        self
    }
    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = Some(n);
        self
    }
    pub fn budget(mut self, n: usize) -> Self {
        self.budget = Some(n);
        self
    }
    pub fn convergence(mut self, convergence: ConvergenceConfig) -> Self {
        self.convergence = Some(convergence);
        self
    }
    pub fn pending_policy(mut self, policy: PendingPolicy) -> Self {
        self.pending_policy = Some(policy);
        self
    }

    pub fn build(self) -> Result<CampaignConfig, ConfigError> {
        let embedding = self.embedding.unwrap_or_default();
        let trainer = self.trainer.unwrap_or_default();
        let acquisition = AcquisitionConfig {
            policy: self.policy.ok_or(ConfigError::MissingParameter("policy"))?,
            batch_size: self
                .batch_size
                .ok_or(ConfigError::MissingParameter("batch_size"))?,
        };
        let stopping = StoppingConfig {
            budget: self.budget.ok_or(ConfigError::MissingParameter("budget"))?,
            convergence: self.convergence,
        };
        let config = CampaignConfig {
            embedding,
            trainer,
            acquisition,
            stopping,
            pending_policy: self.pending_policy.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }
}

impl CampaignConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |name: &'static str, reason: &str| ConfigError::InvalidParameter {
            name,
            reason: reason.to_string(),
        };
        if self.acquisition.batch_size == 0 {
            return Err(invalid("batch_size", "must be at least 1"));
        }
        if self.embedding.batch_size == 0 {
            return Err(invalid("embedding.batch_size", "must be at least 1"));
        }
        if self.embedding.max_tokens_per_batch == Some(0) {
            return Err(invalid("max_tokens_per_batch", "must be at least 1"));
        }
        if self.embedding.truncate_to == Some(0) {
            return Err(invalid("truncate_to", "must be at least 1"));
        }
        if self.trainer.min_labeled < 2 {
            return Err(invalid("min_labeled", "at least two labels are needed to fit"));
        }
        if self.trainer.family == ModelFamily::RandomForest && self.trainer.n_trees == 0 {
            return Err(invalid("n_trees", "must be at least 1"));
        }
        if let Some(c) = &self.stopping.convergence {
            if c.patience_rounds == 0 {
                return Err(invalid("patience_rounds", "must be at least 1"));
            }
            if c.improvement_tolerance.is_nan() || c.improvement_tolerance < 0.0 {
                return Err(invalid("improvement_tolerance", "must be a non-negative number"));
            }
        }
        self.acquisition
            .policy
            .validate()
            .map_err(|reason| invalid("policy", &reason))?;
        if let Some(h) = &self.trainer.hyperparameters {
            h.validate().map_err(|reason| invalid("hyperparameters", &reason))?;
        }
        Ok(())
    }
}
