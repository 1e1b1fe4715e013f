use crate::core::error::ValidationError;
use crate::core::io::IoError;
use crate::core::io::labels::{LabelRecord, RawLabel};
use crate::core::io::reports::write_records;
use crate::core::models::ids::VariantId;
use crate::core::models::sequence::Sequence;
use crate::core::mutants::{Candidate, MutantUniverse, MutationPolicy, enumerate};
use crate::core::utils::stats;
use crate::engine::config::{CampaignConfig, ConfigError};
use crate::engine::embedding::{CancelFlag, Embedding, EmbeddingProvider};
use crate::engine::error::EngineError;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::scheduler::{Campaign, RoundOutcome};
use crate::engine::surrogate;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// A fully labeled mutant universe used as ground truth.
#[derive(Debug, Clone)]
pub struct Dataset {
    universe: Arc<MutantUniverse>,
    truth: Vec<f64>,
}

impl Dataset {
    /// Pairs a universe with a label for every one of its members.
    pub fn new(universe: Arc<MutantUniverse>, labels: &[LabelRecord]) -> Result<Self, EngineError> {
        let mut truth = vec![None; universe.len()];
        for label in labels {
            let slot = truth.get_mut(label.variant.index()).ok_or_else(|| {
                ValidationError::UnknownVariant(label.variant.to_string())
            })?;
            let variant = || {
                universe
                    .descriptor(label.variant)
                    .unwrap_or_else(|| label.variant.to_string())
            };
            if !label.score.is_finite() {
                return Err(EngineError::InvalidLabel {
                    variant: variant(),
                    score: label.score,
                });
            }
            if slot.replace(label.score).is_some() {
                return Err(EngineError::DuplicateLabel { variant: variant() });
            }
        }
        let missing = truth.iter().filter(|t| t.is_none()).count();
        if missing > 0 {
            return Err(ConfigError::InvalidParameter {
                name: "dataset",
                reason: format!("{missing} variant(s) of the universe have no ground-truth label"),
            }
            .into());
        }
        Ok(Self {
            universe,
            truth: truth.into_iter().flatten().collect(),
        })
    }

    /// Builds the universe from the labeled variants themselves. Rows naming a sequence
    /// already seen are dropped with a warning; the first label wins.
    pub fn from_raw(wild_type: &Sequence, raw: &[RawLabel]) -> Result<Self, EngineError> {
        let candidates = raw.iter().map(|r| Candidate::infer(&r.variant)).collect();
        let universe = Arc::new(enumerate(wild_type, &MutationPolicy::ExplicitList { candidates })?);

        let mut seen = HashSet::new();
        let mut labels = Vec::with_capacity(universe.len());
        for row in raw {
            let id = universe.resolve_key(&row.variant)?;
            if seen.insert(id) {
                labels.push(LabelRecord {
                    variant: id,
                    score: row.score,
                });
            } else {
                warn!(line = row.line, variant = %row.variant, "Duplicate variant in dataset; keeping the first label.");
            }
        }
        Self::new(universe, &labels)
    }

    pub fn universe(&self) -> &Arc<MutantUniverse> {
        &self.universe
    }

    pub fn len(&self) -> usize {
        self.truth.len()
    }

    pub fn is_empty(&self) -> bool {
        self.truth.is_empty()
    }

    pub fn truth(&self, id: VariantId) -> Option<f64> {
        self.truth.get(id.index()).copied()
    }

    pub fn labels(&self) -> Vec<LabelRecord> {
        self.truth
            .iter()
            .enumerate()
            .map(|(i, &score)| LabelRecord {
                variant: VariantId(i),
                score,
            })
            .collect()
    }

    pub fn best(&self) -> Option<f64> {
        self.truth.iter().copied().reduce(f64::max)
    }
}

#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    pub name: String,
    pub campaign: CampaignConfig,
    /// Randomly chosen variants labeled before the first round.
    pub initial_samples: usize,
    pub repeats: usize,
    /// Seed of the first repeat; repeat `r` uses `seed + r`.
    pub seed: u64,
}

/// One round of one repeat, as written to the benchmark CSV.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkRow {
    pub config: String,
    pub repeat: usize,
    pub seed: u64,
    pub round: usize,
    /// Labeled variants after the round's selection was revealed.
    pub labeled: usize,
    pub selected: usize,
    pub best_so_far: f64,
    /// Rank correlation between the round's predictions and the truth over the dataset.
    pub spearman: Option<f64>,
    /// Mean true fitness of the round's selection.
    pub selection_mean: Option<f64>,
    pub cv_mse: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkSummary {
    pub config: String,
    pub repeats: usize,
    pub mean_final_best: f64,
    pub mean_final_spearman: Option<f64>,
    /// Repeats whose labeled set contains the dataset optimum.
    pub found_optimum: usize,
}

#[derive(Debug, Clone, Default)]
pub struct BenchmarkReport {
    pub rows: Vec<BenchmarkRow>,
}

impl BenchmarkReport {
    pub fn write_csv(&self, path: &Path) -> Result<(), IoError> {
        write_records(path, &self.rows)
    }

    fn final_rows(&self) -> Vec<&BenchmarkRow> {
        let mut last: Vec<&BenchmarkRow> = Vec::new();
        for row in &self.rows {
            match last
                .iter()
                .position(|r| r.config == row.config && r.repeat == row.repeat)
            {
                Some(i) if row.round >= last[i].round => last[i] = row,
                Some(_) => {}
                None => last.push(row),
            }
        }
        last
    }

    /// Final-round statistics per configuration, in first-appearance order.
    pub fn summarize(&self, optimum: Option<f64>) -> Vec<BenchmarkSummary> {
        let finals = self.final_rows();
        let mut names: Vec<&str> = Vec::new();
        for row in &finals {
            if !names.contains(&row.config.as_str()) {
                names.push(&row.config);
            }
        }
        names
            .into_iter()
            .map(|name| {
                let rows: Vec<&&BenchmarkRow> = finals.iter().filter(|r| r.config == name).collect();
                let bests: Vec<f64> = rows.iter().map(|r| r.best_so_far).collect();
                let spearmans: Vec<f64> = rows.iter().filter_map(|r| r.spearman).collect();
                BenchmarkSummary {
                    config: name.to_string(),
                    repeats: rows.len(),
                    mean_final_best: stats::mean(&bests).unwrap_or(f64::NAN),
                    mean_final_spearman: stats::mean(&spearmans),
                    found_optimum: optimum
                        .map(|best| bests.iter().filter(|b| **b >= best).count())
                        .unwrap_or(0),
                }
            })
            .collect()
    }
}

/// Replays `dataset` through repeated campaigns, revealing ground truth for every
/// selection.
#[instrument(skip_all, name = "benchmark_workflow", fields(config = %config.name))]
pub fn run(
    dataset: &Dataset,
    provider: &EmbeddingProvider,
    config: &BenchmarkConfig,
    cancel: &CancelFlag,
    reporter: &ProgressReporter,
) -> Result<BenchmarkReport, EngineError> {
    if config.initial_samples == 0 || config.initial_samples > dataset.len() {
        return Err(ConfigError::InvalidParameter {
            name: "initial_samples",
            reason: format!(
                "must be between 1 and the dataset size ({}), got {}",
                dataset.len(),
                config.initial_samples
            ),
        }
        .into());
    }
    if config.repeats == 0 {
        return Err(ConfigError::InvalidParameter {
            name: "repeats",
            reason: "must be at least 1".to_string(),
        }
        .into());
    }

    // === Phase 0: Embed the whole dataset once ===
    let (eval_ids, eval_embeddings, eval_truth) = {
        let _phase = reporter.phase("Embedding dataset");
        let variants: Vec<_> = dataset.universe.variants().iter().collect();
        let report = provider.embed(&variants, cancel, reporter)?;
        if report.was_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if !report.is_complete() {
            warn!(
                failures = report.failures.len(),
                "Some dataset variants could not be embedded; they are never scored."
            );
        }
        let mut ids = Vec::new();
        let mut embeddings: Vec<Embedding> = Vec::new();
        let mut truth = Vec::new();
        for (i, embedding) in report.embeddings.into_iter().enumerate() {
            if let Some(embedding) = embedding {
                ids.push(VariantId(i));
                embeddings.push(embedding);
                truth.push(dataset.truth[i]);
            }
        }
        (ids, embeddings, truth)
    };
    info!(
        variants = dataset.len(),
        scored = eval_ids.len(),
        repeats = config.repeats,
        "Starting benchmark."
    );

    // === Phase 1: Repeats ===
    let _phase = reporter.phase("Benchmark repeats");
    reporter.report(Progress::TaskStart {
        total_steps: config.repeats as u64,
    });
    let mut rows = Vec::new();
    for repeat in 0..config.repeats {
        let seed = config.seed.wrapping_add(repeat as u64);
        let mut campaign = Campaign::new(Arc::clone(&dataset.universe), config.campaign.clone())?;

        let mut rng = StdRng::seed_from_u64(seed);
        let mut initial: Vec<usize> = sample(&mut rng, dataset.len(), config.initial_samples).into_vec();
        initial.sort_unstable();
        let seeded: Vec<LabelRecord> = initial
            .into_iter()
            .map(|i| LabelRecord {
                variant: VariantId(i),
                score: dataset.truth[i],
            })
            .collect();
        campaign.ingest(&seeded)?;

        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let report = match campaign.run_round(provider, cancel, reporter)? {
                RoundOutcome::Selected(report) => report,
                RoundOutcome::Converged | RoundOutcome::BudgetExhausted => break,
            };
            let round = &report.round;
            let revealed: Vec<LabelRecord> = round
                .selected
                .iter()
                .map(|s| LabelRecord {
                    variant: s.variant,
                    score: dataset.truth[s.variant.index()],
                })
                .collect();
            campaign.ingest(&revealed)?;

            let predicted: Vec<f64> = surrogate::predict(&round.snapshot, &eval_embeddings)?
                .into_iter()
                .map(|p| p.mean)
                .collect();
            let selection_truth: Vec<f64> = revealed.iter().map(|l| l.score).collect();
            rows.push(BenchmarkRow {
                config: config.name.clone(),
                repeat,
                seed,
                round: round.index,
                labeled: campaign.status_counts().labeled,
                selected: round.selected.len(),
                best_so_far: campaign.best_label().map(|l| l.score).unwrap_or(f64::NAN),
                spearman: stats::spearman(&predicted, &eval_truth),
                selection_mean: stats::mean(&selection_truth),
                cv_mse: round.snapshot.cv_mse,
            });
        }

        info!(
            repeat,
            seed,
            rounds = campaign.rounds().len(),
            best = ?campaign.best_label().map(|l| l.score),
            "Benchmark repeat finished."
        );
        reporter.report(Progress::TaskIncrement { steps: 1 });
    }
    reporter.report(Progress::TaskFinish);

    Ok(BenchmarkReport { rows })
}

/// Runs several configurations against the same dataset and provider, sharing its cache.
#[instrument(skip_all, name = "benchmark_compare")]
pub fn compare(
    dataset: &Dataset,
    provider: &EmbeddingProvider,
    configs: &[BenchmarkConfig],
    cancel: &CancelFlag,
    reporter: &ProgressReporter,
) -> Result<BenchmarkReport, EngineError> {
    let mut names = HashSet::new();
    if let Some(duplicate) = configs.iter().find(|c| !names.insert(c.name.as_str())) {
        return Err(ConfigError::InvalidParameter {
            name: "compare",
            reason: format!("configuration name '{}' is used twice", duplicate.name),
        }
        .into());
    }
    info!(configs = configs.len(), "Comparing benchmark configurations.");

    #[cfg(feature = "parallel")]
    let configs = configs.par_iter();
    #[cfg(not(feature = "parallel"))]
    let configs = configs.iter();

    let reports = configs
        .map(|config| run(dataset, provider, config, cancel, reporter))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(BenchmarkReport {
        rows: reports.into_iter().flat_map(|r| r.rows).collect(),
    })
}
