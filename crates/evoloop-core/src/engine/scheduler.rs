use super::acquisition::{self, Selection};
use super::config::{CampaignConfig, PendingPolicy};
use super::embedding::{CancelFlag, EmbeddingProvider};
use super::error::EngineError;
use super::progress::{Progress, ProgressReporter};
use super::state::{Phase, Round, RoundSummary, StatusCounts, VariantStatus};
use super::surrogate::{self, ModelSnapshot, TrainingError, TrainingPoint, UncertaintyKind};
use crate::core::error::ValidationError;
use crate::core::io::IoError;
use crate::core::io::labels::LabelRecord;
use crate::core::io::ledger::LedgerEntry;
use crate::core::io::reports::write_records;
use crate::core::models::ids::VariantId;
use crate::core::models::variant::Variant;
use crate::core::mutants::MutantUniverse;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One recommended variant, as written to the round output CSV.
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub round: usize,
    pub rank: usize,
    pub variant: String,
    pub sequence: String,
    pub predicted_mean: f64,
    pub uncertainty: f64,
    pub uncertainty_kind: UncertaintyKind,
    pub acquisition_score: f64,
    pub model: String,
    pub policy: String,
    pub cv_mse: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct RoundReport {
    pub round: Arc<Round>,
    pub recommendations: Vec<Recommendation>,
}

impl RoundReport {
    pub fn index(&self) -> usize {
        self.round.index
    }

    pub fn snapshot(&self) -> &ModelSnapshot {
        &self.round.snapshot
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), IoError> {
        write_records(path, &self.recommendations)
    }
}

#[derive(Debug, Clone)]
pub enum RoundOutcome {
    Selected(RoundReport),
    Converged,
    BudgetExhausted,
}

/// An active-learning campaign over a fixed mutant universe.
///
/// Every member of the universe is a candidate, pending, or labeled at all times. Labels
/// arrive through [`Campaign::ingest`]; [`Campaign::run_round`] trains on them, scores the
/// remaining candidates, and moves the next batch to pending.
pub struct Campaign {
    universe: Arc<MutantUniverse>,
    config: CampaignConfig,
    phase: Phase,
    status: Vec<VariantStatus>,
    /// Rounds closed by this process.
    rounds: Vec<Arc<Round>>,
    /// Every closed round, including those restored by [`Campaign::resume`].
    history: Vec<RoundSummary>,
    total_selected: usize,
}

impl Campaign {
    pub fn new(universe: Arc<MutantUniverse>, config: CampaignConfig) -> Result<Self, EngineError> {
        config.validate()?;
        if universe.is_empty() {
            return Err(EngineError::Validation {
                source: ValidationError::InvalidPolicy("mutant universe is empty".into()),
            });
        }
        let status = vec![VariantStatus::Candidate; universe.len()];
        info!(
            variants = universe.len(),
            budget = config.stopping.budget,
            batch_size = config.acquisition.batch_size,
            policy = %config.acquisition.policy,
            model = %config.trainer.family,
            "Campaign created."
        );
        Ok(Self {
            universe,
            config,
            phase: Phase::AwaitingLabels { round: 0 },
            status,
            rounds: Vec::new(),
            history: Vec::new(),
            total_selected: 0,
        })
    }

    /// Rebuilds a campaign from rounds closed by an earlier process.
    ///
    /// Their selections count against the budget and are pending until labels for them are
    /// ingested. Round numbering and the convergence history continue where they stopped.
    pub fn resume(
        universe: Arc<MutantUniverse>,
        config: CampaignConfig,
        history: Vec<RoundSummary>,
    ) -> Result<Self, EngineError> {
        let mut campaign = Self::new(universe, config)?;
        let mut seen = HashSet::new();
        for (expected, round) in history.iter().enumerate() {
            if round.index != expected {
                return Err(EngineError::InconsistentHistory(format!(
                    "expected round {expected}, found round {}",
                    round.index
                )));
            }
            if round.selected.is_empty() {
                return Err(EngineError::InconsistentHistory(format!(
                    "round {expected} selected nothing"
                )));
            }
            for &id in &round.selected {
                if campaign.status(id).is_none() {
                    return Err(EngineError::Validation {
                        source: ValidationError::UnknownVariant(id.to_string()),
                    });
                }
                if !seen.insert(id) {
                    return Err(EngineError::InconsistentHistory(format!(
                        "variant {} was selected in more than one round",
                        campaign.universe.descriptor(id).unwrap_or_else(|| id.to_string())
                    )));
                }
                campaign.status[id.index()] = VariantStatus::Pending { round: round.index };
            }
        }
        let budget = campaign.config.stopping.budget;
        if seen.len() > budget {
            return Err(EngineError::InconsistentHistory(format!(
                "{} earlier selections exceed the budget of {budget}",
                seen.len()
            )));
        }
        campaign.total_selected = seen.len();
        campaign.phase = Phase::AwaitingLabels {
            round: history.len(),
        };
        campaign.history = history;
        info!(
            rounds = campaign.history.len(),
            total_selected = campaign.total_selected,
            remaining_budget = campaign.remaining_budget(),
            "Campaign resumed."
        );
        Ok(campaign)
    }

    pub fn universe(&self) -> &Arc<MutantUniverse> {
        &self.universe
    }

    pub fn config(&self) -> &CampaignConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn rounds(&self) -> &[Arc<Round>] {
        &self.rounds
    }

    pub fn history(&self) -> &[RoundSummary] {
        &self.history
    }

    /// The round history as ledger rows, ready to be written for the next process.
    pub fn ledger(&self) -> Vec<LedgerEntry> {
        self.history.iter().flat_map(RoundSummary::ledger_entries).collect()
    }

    pub fn status(&self, id: VariantId) -> Option<VariantStatus> {
        self.status.get(id.index()).copied()
    }

    fn ids_where(&self, keep: impl Fn(&VariantStatus) -> bool) -> Vec<VariantId> {
        self.status
            .iter()
            .enumerate()
            .filter(|(_, s)| keep(*s))
            .map(|(i, _)| VariantId(i))
            .collect()
    }

    pub fn candidates(&self) -> Vec<VariantId> {
        self.ids_where(VariantStatus::is_candidate)
    }

    pub fn pending(&self) -> Vec<VariantId> {
        self.ids_where(VariantStatus::is_pending)
    }

    /// All labels received so far, in enumeration order.
    pub fn labeled(&self) -> Vec<LabelRecord> {
        self.status
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                s.score().map(|score| LabelRecord {
                    variant: VariantId(i),
                    score,
                })
            })
            .collect()
    }

    /// Highest label so far; ties go to the earlier variant.
    pub fn best_label(&self) -> Option<LabelRecord> {
        self.labeled()
            .into_iter()
            .reduce(|best, next| if next.score > best.score { next } else { best })
    }

    pub fn total_selected(&self) -> usize {
        self.total_selected
    }

    pub fn remaining_budget(&self) -> usize {
        self.config.stopping.budget.saturating_sub(self.total_selected)
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for status in &self.status {
            match status {
                VariantStatus::Candidate => counts.candidates += 1,
                VariantStatus::Pending { .. } => counts.pending += 1,
                VariantStatus::Labeled { .. } => counts.labeled += 1,
            }
        }
        counts
    }

    /// Labels that have come back for the variants selected in `round`.
    pub fn revealed_labels(&self, round: usize) -> Vec<LabelRecord> {
        let Some(round) = self.history.get(round) else {
            return Vec::new();
        };
        round
            .selected
            .iter()
            .filter_map(|&variant| {
                self.status(variant)?
                    .score()
                    .map(|score| LabelRecord { variant, score })
            })
            .collect()
    }

    /// Checks the bookkeeping that every public operation preserves.
    pub fn check_invariants(&self) -> Result<(), EngineError> {
        if self.status.len() != self.universe.len() {
            return Err(EngineError::Internal(format!(
                "status table covers {} of {} variants",
                self.status.len(),
                self.universe.len()
            )));
        }
        if self.total_selected > self.config.stopping.budget {
            return Err(EngineError::Internal(format!(
                "{} selections exceed the budget of {}",
                self.total_selected, self.config.stopping.budget
            )));
        }
        let mut seen = HashSet::new();
        for (expected, round) in self.history.iter().enumerate() {
            if round.index != expected {
                return Err(EngineError::Internal(format!(
                    "history position {expected} holds round {}",
                    round.index
                )));
            }
            for &variant in &round.selected {
                if !seen.insert(variant) {
                    return Err(EngineError::Internal(format!(
                        "variant {variant} was selected twice"
                    )));
                }
                if self.status(variant).is_none_or(|s| s.is_candidate()) {
                    return Err(EngineError::Internal(format!(
                        "selected variant {variant} returned to the candidate pool"
                    )));
                }
            }
        }
        if seen.len() != self.total_selected {
            return Err(EngineError::Internal(format!(
                "rounds record {} selections, counter says {}",
                seen.len(),
                self.total_selected
            )));
        }
        Ok(())
    }

    /// Records measured scores.
    ///
    /// Accepted while awaiting labels (for candidates and pending variants) and after the
    /// campaign has stopped (for pending variants only). The batch is validated as a whole;
    /// on error nothing is recorded.
    pub fn ingest(&mut self, records: &[LabelRecord]) -> Result<usize, EngineError> {
        let terminal = match self.phase {
            Phase::AwaitingLabels { .. } => false,
            Phase::Converged | Phase::BudgetExhausted => true,
            phase => {
                return Err(EngineError::InvalidTransition {
                    phase: phase.to_string(),
                    action: "ingest labels",
                });
            }
        };

        let mut batch = HashSet::with_capacity(records.len());
        for record in records {
            let descriptor = || {
                self.universe
                    .descriptor(record.variant)
                    .unwrap_or_else(|| record.variant.to_string())
            };
            let Some(status) = self.status(record.variant) else {
                return Err(EngineError::Validation {
                    source: ValidationError::UnknownVariant(record.variant.to_string()),
                });
            };
            if !record.score.is_finite() {
                return Err(EngineError::InvalidLabel {
                    variant: descriptor(),
                    score: record.score,
                });
            }
            if !batch.insert(record.variant) {
                return Err(EngineError::DuplicateLabel { variant: descriptor() });
            }
            match status {
                VariantStatus::Labeled { .. } => {
                    return Err(EngineError::AlreadyLabeled { variant: descriptor() });
                }
                VariantStatus::Candidate if terminal => {
                    return Err(EngineError::InvalidTransition {
                        phase: self.phase.to_string(),
                        action: "label a variant that was never selected",
                    });
                }
                _ => {}
            }
        }

        for record in records {
            self.status[record.variant.index()] = VariantStatus::Labeled {
                score: record.score,
            };
        }
        let counts = self.status_counts();
        info!(
            ingested = records.len(),
            labeled = counts.labeled,
            pending = counts.pending,
            "Labels ingested."
        );
        Ok(records.len())
    }

    /// Excludes variants that are already being measured outside this campaign. They are
    /// tracked as pending for the current round until their labels are ingested, and do not
    /// count against the selection budget.
    pub fn mark_in_flight(&mut self, ids: &[VariantId]) -> Result<usize, EngineError> {
        let Phase::AwaitingLabels { round } = self.phase else {
            return Err(EngineError::InvalidTransition {
                phase: self.phase.to_string(),
                action: "mark variants as in flight",
            });
        };
        for id in ids {
            match self.status(*id) {
                None => {
                    return Err(EngineError::Validation {
                        source: ValidationError::UnknownVariant(id.to_string()),
                    });
                }
                Some(VariantStatus::Labeled { .. }) => {
                    return Err(EngineError::AlreadyLabeled {
                        variant: self.universe.descriptor(*id).unwrap_or_else(|| id.to_string()),
                    });
                }
                _ => {}
            }
        }
        let mut marked = 0;
        for id in ids {
            let status = &mut self.status[id.index()];
            if status.is_candidate() {
                *status = VariantStatus::Pending { round };
                marked += 1;
            }
        }
        debug!(marked, "Variants marked as in flight.");
        Ok(marked)
    }

    fn convergence_reached(&self) -> bool {
        let Some(convergence) = &self.config.stopping.convergence else {
            return false;
        };
        let current = self.best_label().map(|l| l.score);
        let mut history = self
            .history
            .iter()
            .map(|r| r.best_at_start)
            .chain(std::iter::once(current))
            .map(|b| b.unwrap_or(f64::NEG_INFINITY));
        let Some(mut reference) = history.next() else {
            return false;
        };
        let mut stale = 0;
        for best in history {
            if best > reference + convergence.improvement_tolerance {
                reference = best;
                stale = 0;
            } else {
                stale += 1;
            }
        }
        stale >= convergence.patience_rounds
    }

    /// Runs one selection round: train on the current labels, score every candidate, and
    /// move the next batch to pending.
    ///
    /// On error the campaign stays in `AwaitingLabels` for the same round, so the call can be
    /// retried once the cause (missing labels, cancellation) is addressed.
    pub fn run_round(
        &mut self,
        provider: &EmbeddingProvider,
        cancel: &CancelFlag,
        reporter: &ProgressReporter,
    ) -> Result<RoundOutcome, EngineError> {
        let round = match self.phase {
            Phase::AwaitingLabels { round } => round,
            Phase::Converged => return Ok(RoundOutcome::Converged),
            Phase::BudgetExhausted => return Ok(RoundOutcome::BudgetExhausted),
            phase => {
                return Err(EngineError::InvalidTransition {
                    phase: phase.to_string(),
                    action: "start a round",
                });
            }
        };

        let counts = self.status_counts();
        if counts.pending > 0 && self.config.pending_policy == PendingPolicy::RequireAll {
            return Err(EngineError::PendingLabels {
                count: counts.pending,
            });
        }
        if self.convergence_reached() {
            info!(round, best = ?self.best_label().map(|l| l.score), "Campaign converged.");
            self.phase = Phase::Converged;
            return Ok(RoundOutcome::Converged);
        }
        if self.remaining_budget() == 0 || counts.candidates == 0 {
            info!(
                round,
                selected = self.total_selected,
                candidates = counts.candidates,
                "Campaign budget exhausted."
            );
            self.phase = Phase::BudgetExhausted;
            return Ok(RoundOutcome::BudgetExhausted);
        }
        let required = self.config.trainer.min_labeled;
        if counts.labeled < required {
            return Err(TrainingError::DataInsufficiency {
                available: counts.labeled,
                required,
            }
            .into());
        }

        match self.execute_round(round, provider, cancel, reporter) {
            Ok(report) => Ok(RoundOutcome::Selected(report)),
            Err(e) => {
                warn!(round, error = %e, "Round failed; still awaiting labels.");
                self.phase = Phase::AwaitingLabels { round };
                Err(e)
            }
        }
    }

    fn execute_round(
        &mut self,
        round: usize,
        provider: &EmbeddingProvider,
        cancel: &CancelFlag,
        reporter: &ProgressReporter,
    ) -> Result<RoundReport, EngineError> {
        let universe = Arc::clone(&self.universe);
        let labels = self.labeled();
        let best_at_start = self.best_label().map(|l| l.score);

        // === Phase 1: Training ===
        self.phase = Phase::Training { round };
        let snapshot = {
            let _phase = reporter.phase("Training");
            let variants = lookup_variants(&universe, labels.iter().map(|l| l.variant))?;
            let embedded = provider.embed(&variants, cancel, reporter)?;
            if embedded.was_cancelled() {
                return Err(EngineError::Cancelled);
            }
            for (index, error) in &embedded.failures {
                warn!(variant = %variants[*index], error = %error, "Labeled variant could not be embedded; left out of training.");
            }
            let points: Vec<TrainingPoint> = labels
                .iter()
                .zip(embedded.embeddings)
                .filter_map(|(label, embedding)| {
                    embedding.map(|embedding| TrainingPoint {
                        variant: label.variant,
                        embedding,
                        score: label.score,
                    })
                })
                .collect();
            Arc::new(surrogate::fit_points(&points, &self.config.trainer)?)
        };
        let mut embedding_failures = labels.len() - snapshot.labeled.len();

        // === Phase 2: Scoring ===
        self.phase = Phase::Scoring { round };
        let scored = {
            let _phase = reporter.phase("Scoring");
            let pool = self.candidates();
            let variants = lookup_variants(&universe, pool.iter().copied())?;
            let embedded = provider.embed(&variants, cancel, reporter)?;
            if embedded.was_cancelled() {
                return Err(EngineError::Cancelled);
            }
            embedding_failures += embedded.failures.len();
            let (ids, embeddings): (Vec<VariantId>, Vec<_>) = pool
                .iter()
                .zip(embedded.embeddings)
                .filter_map(|(id, embedding)| embedding.map(|e| (*id, e)))
                .unzip();
            if ids.is_empty() {
                return Err(EngineError::NoScorableCandidates {
                    failures: embedded.failures.len(),
                });
            }
            let predictions = surrogate::predict(&snapshot, &embeddings)?;
            ids.into_iter().zip(predictions).collect::<Vec<_>>()
        };

        // === Phase 3: Selecting ===
        self.phase = Phase::Selecting { round };
        let k = self
            .config
            .acquisition
            .batch_size
            .min(self.remaining_budget());
        let selected: Vec<Selection> =
            acquisition::select(&scored, k, &self.config.acquisition.policy, &universe);
        if selected.is_empty() {
            return Err(EngineError::Internal("acquisition selected nothing".into()));
        }

        for selection in &selected {
            self.status[selection.variant.index()] = VariantStatus::Pending { round };
        }
        self.total_selected += selected.len();

        let closed = Arc::new(Round {
            index: round,
            labels_at_start: labels,
            best_at_start,
            selected,
            snapshot,
            policy: self.config.acquisition.policy.clone(),
            scored: scored.len(),
            embedding_failures,
        });
        self.history.push(closed.summary());
        self.rounds.push(Arc::clone(&closed));

        self.phase = if self.remaining_budget() == 0 {
            Phase::BudgetExhausted
        } else {
            Phase::AwaitingLabels { round: round + 1 }
        };
        reporter.report(Progress::Message(format!(
            "Round {round} selected {} variant(s)",
            closed.selected.len()
        )));
        info!(
            round,
            selected = closed.selected.len(),
            scored = closed.scored,
            total_selected = self.total_selected,
            budget = self.config.stopping.budget,
            embedding_failures,
            "Round closed."
        );

        let recommendations = recommendations_for(&closed, &universe);
        Ok(RoundReport {
            round: closed,
            recommendations,
        })
    }
}

fn lookup_variants(
    universe: &MutantUniverse,
    ids: impl Iterator<Item = VariantId>,
) -> Result<Vec<&Variant>, EngineError> {
    ids.map(|id| {
        universe
            .get(id)
            .ok_or_else(|| EngineError::Internal(format!("variant {id} is not in the universe")))
    })
    .collect()
}

fn recommendations_for(round: &Round, universe: &MutantUniverse) -> Vec<Recommendation> {
    let model = round.snapshot.family().to_string();
    let policy = round.policy.to_string();
    debug!(round = round.index, "Building recommendation rows.");
    round
        .selected
        .iter()
        .enumerate()
        .filter_map(|(rank, s)| {
            let variant = universe.get(s.variant)?;
            Some(Recommendation {
                round: round.index,
                rank: rank + 1,
                variant: variant.descriptor(),
                sequence: variant.sequence().to_string(),
                predicted_mean: s.prediction.mean,
                uncertainty: s.prediction.uncertainty,
                uncertainty_kind: s.prediction.kind,
                acquisition_score: s.score,
                model: model.clone(),
                policy: policy.clone(),
                cv_mse: round.snapshot.cv_mse,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::residue::Alphabet;
    use crate::core::models::sequence::Sequence;
    use crate::core::mutants::{MutationPolicy, enumerate};
    use crate::engine::acquisition::AcquisitionPolicy;
    use crate::engine::cache::RepresentationCache;
    use crate::engine::config::{CampaignConfigBuilder, ConvergenceConfig, EmbeddingConfig};
    use crate::engine::embedding::backends::OneHotBackend;

    fn universe() -> Arc<MutantUniverse> {
        let wt = Sequence::parse("ACDEF").unwrap();
        let policy = MutationPolicy::SingleSite {
            positions: None,
            alphabet: "ACDEFGHK".parse::<Alphabet>().unwrap(),
        };
        Arc::new(enumerate(&wt, &policy).unwrap())
    }

    fn truth(universe: &MutantUniverse, id: VariantId) -> f64 {
        let variant = universe.get(id).unwrap();
        variant
            .sequence()
            .as_bytes()
            .iter()
            .enumerate()
            .map(|(i, b)| (*b as f64 - 65.0) * (i as f64 + 1.0) / 10.0)
            .sum()
    }

    fn label(universe: &MutantUniverse, ids: impl IntoIterator<Item = usize>) -> Vec<LabelRecord> {
        ids.into_iter()
            .map(|i| LabelRecord {
                variant: VariantId(i),
                score: truth(universe, VariantId(i)),
            })
            .collect()
    }

    fn campaign(budget: usize, batch: usize) -> Campaign {
        let config = CampaignConfigBuilder::new()
            .policy(AcquisitionPolicy::Exploit)
            .batch_size(batch)
            .budget(budget)
            .build()
            .unwrap();
        Campaign::new(universe(), config).unwrap()
    }

    struct Fixture {
        backend: OneHotBackend,
        cache: RepresentationCache,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                backend: OneHotBackend::default(),
                cache: RepresentationCache::in_memory(),
            }
        }

        fn provider(&self) -> EmbeddingProvider<'_> {
            EmbeddingProvider::new(&self.backend, &self.cache, EmbeddingConfig::default())
        }
    }

    fn run(campaign: &mut Campaign, fixture: &Fixture) -> Result<RoundOutcome, EngineError> {
        campaign.run_round(&fixture.provider(), &CancelFlag::new(), &ProgressReporter::new())
    }

    fn reveal_pending(campaign: &mut Campaign) {
        let universe = Arc::clone(campaign.universe());
        let pending: Vec<usize> = campaign.pending().iter().map(|id| id.index()).collect();
        campaign.ingest(&label(&universe, pending)).unwrap();
    }

    #[test]
    fn too_few_labels_leaves_the_campaign_awaiting_labels() {
        let fixture = Fixture::new();
        let mut c = campaign(10, 2);
        let u = Arc::clone(c.universe());
        c.ingest(&label(&u, [0, 1, 2])).unwrap();
        let err = run(&mut c, &fixture).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Training {
                source: TrainingError::DataInsufficiency {
                    available: 3,
                    required: 5
                }
            }
        ));
        assert_eq!(c.phase(), Phase::AwaitingLabels { round: 0 });
        assert!(c.rounds().is_empty());
    }

    #[test]
    fn a_round_moves_the_selection_to_pending() {
        let fixture = Fixture::new();
        let mut c = campaign(20, 4);
        let u = Arc::clone(c.universe());
        c.ingest(&label(&u, [0, 7, 14, 21, 28, 3])).unwrap();

        let RoundOutcome::Selected(report) = run(&mut c, &fixture).unwrap() else {
            panic!("expected a selection");
        };
        assert_eq!(report.index(), 0);
        assert_eq!(report.recommendations.len(), 4);
        assert_eq!(report.recommendations[0].rank, 1);
        assert_eq!(c.phase(), Phase::AwaitingLabels { round: 1 });

        let counts = c.status_counts();
        assert_eq!(counts.pending, 4);
        assert_eq!(counts.labeled, 6);
        assert_eq!(counts.total(), u.len());
        for s in &report.round.selected {
            assert_eq!(c.status(s.variant), Some(VariantStatus::Pending { round: 0 }));
            assert!(!c.candidates().contains(&s.variant));
        }
        assert_eq!(report.snapshot().labeled.len(), 6);
        c.check_invariants().unwrap();
    }

    #[test]
    fn resumed_campaign_continues_numbering_and_budget() {
        let fixture = Fixture::new();
        let mut first = campaign(6, 3);
        let u = Arc::clone(first.universe());
        first.ingest(&label(&u, [0, 7, 14, 21, 28, 3])).unwrap();
        run(&mut first, &fixture).unwrap();
        let ledger = first.ledger();
        assert_eq!(ledger.len(), 3);

        let config = first.config().clone();
        let mut second =
            Campaign::resume(Arc::clone(&u), config, RoundSummary::from_ledger(&ledger)).unwrap();
        assert_eq!(second.phase(), Phase::AwaitingLabels { round: 1 });
        assert_eq!(second.total_selected(), 3);
        assert_eq!(second.status_counts().pending, 3);
        second.ingest(&label(&u, [0, 7, 14, 21, 28, 3])).unwrap();
        reveal_pending(&mut second);
        assert_eq!(second.revealed_labels(0).len(), 3);

        let RoundOutcome::Selected(report) = run(&mut second, &fixture).unwrap() else {
            panic!("expected a selection");
        };
        assert_eq!(report.index(), 1);
        assert_eq!(second.total_selected(), 6);
        assert_eq!(second.history().len(), 2);
        assert_eq!(second.rounds().len(), 1);
        for s in &report.round.selected {
            assert!(!ledger.iter().any(|e| e.variant == s.variant));
        }
        second.check_invariants().unwrap();
        assert!(matches!(
            run(&mut second, &fixture).unwrap(),
            RoundOutcome::BudgetExhausted
        ));
    }

    #[test]
    fn resume_rejects_inconsistent_history() {
        let u = universe();
        let config = campaign(4, 2).config().clone();
        let summary = |index, selected: Vec<usize>| RoundSummary {
            index,
            best_at_start: None,
            selected: selected.into_iter().map(VariantId).collect(),
        };

        let gap = vec![summary(0, vec![1]), summary(2, vec![2])];
        let twice = vec![summary(0, vec![1]), summary(1, vec![1])];
        let over_budget = vec![summary(0, vec![1, 2, 3]), summary(1, vec![4, 5])];
        for history in [gap, twice, over_budget] {
            assert!(matches!(
                Campaign::resume(Arc::clone(&u), config.clone(), history),
                Err(EngineError::InconsistentHistory(_))
            ));
        }
        let unknown = vec![summary(0, vec![u.len()])];
        assert!(matches!(
            Campaign::resume(Arc::clone(&u), config, unknown),
            Err(EngineError::Validation { .. })
        ));
    }

    #[test]
    fn pending_labels_block_the_next_round_unless_partial_is_allowed() {
        let fixture = Fixture::new();
        let mut c = campaign(20, 3);
        let u = Arc::clone(c.universe());
        c.ingest(&label(&u, 0..6)).unwrap();
        run(&mut c, &fixture).unwrap();
        assert!(matches!(
            run(&mut c, &fixture),
            Err(EngineError::PendingLabels { count: 3 })
        ));
        assert_eq!(c.phase(), Phase::AwaitingLabels { round: 1 });

        let config = CampaignConfigBuilder::new()
            .policy(AcquisitionPolicy::Exploit)
            .batch_size(3)
            .budget(20)
            .pending_policy(PendingPolicy::AllowPartial)
            .build()
            .unwrap();
        let mut partial = Campaign::new(Arc::clone(&u), config).unwrap();
        partial.ingest(&label(&u, 0..6)).unwrap();
        run(&mut partial, &fixture).unwrap();
        let first_pending = partial.pending();
        run(&mut partial, &fixture).unwrap();
        assert_eq!(partial.pending().len(), 6);
        for id in first_pending {
            assert_eq!(partial.status(id), Some(VariantStatus::Pending { round: 0 }));
        }
        partial.check_invariants().unwrap();
    }

    #[test]
    fn selections_never_exceed_the_budget() {
        let fixture = Fixture::new();
        let mut c = campaign(6, 4);
        let u = Arc::clone(c.universe());
        c.ingest(&label(&u, 0..5)).unwrap();

        let mut history = vec![c.total_selected()];
        loop {
            match run(&mut c, &fixture).unwrap() {
                RoundOutcome::Selected(_) => {
                    history.push(c.total_selected());
                    c.check_invariants().unwrap();
                    if c.phase().is_terminal() {
                        break;
                    }
                    reveal_pending(&mut c);
                }
                RoundOutcome::BudgetExhausted | RoundOutcome::Converged => break,
            }
        }
        assert_eq!(history, vec![0, 4, 6]);
        assert_eq!(c.phase(), Phase::BudgetExhausted);
        assert!(matches!(run(&mut c, &fixture), Ok(RoundOutcome::BudgetExhausted)));

        // late labels for the last batch are still accepted
        reveal_pending(&mut c);
        assert_eq!(c.revealed_labels(1).len(), 2);
        assert!(c.pending().is_empty());
    }

    #[test]
    fn stalled_rounds_converge() {
        let fixture = Fixture::new();
        let config = CampaignConfigBuilder::new()
            .policy(AcquisitionPolicy::Exploit)
            .batch_size(2)
            .budget(30)
            .convergence(ConvergenceConfig {
                improvement_tolerance: 1e9,
                patience_rounds: 2,
            })
            .build()
            .unwrap();
        let u = universe();
        let mut c = Campaign::new(Arc::clone(&u), config).unwrap();
        c.ingest(&label(&u, 0..5)).unwrap();

        assert!(matches!(run(&mut c, &fixture), Ok(RoundOutcome::Selected(_))));
        reveal_pending(&mut c);
        assert!(matches!(run(&mut c, &fixture), Ok(RoundOutcome::Selected(_))));
        reveal_pending(&mut c);
        assert!(matches!(run(&mut c, &fixture), Ok(RoundOutcome::Converged)));
        assert_eq!(c.phase(), Phase::Converged);
        assert_eq!(c.rounds().len(), 2);
    }

    #[test]
    fn bad_label_batches_change_nothing() {
        let mut c = campaign(10, 2);
        let u = Arc::clone(c.universe());
        c.ingest(&label(&u, [0])).unwrap();

        let relabel = [LabelRecord { variant: VariantId(1), score: 1.0 }, LabelRecord { variant: VariantId(0), score: 2.0 }];
        assert!(matches!(c.ingest(&relabel), Err(EngineError::AlreadyLabeled { .. })));
        assert_eq!(c.status(VariantId(1)), Some(VariantStatus::Candidate));

        let not_finite = [LabelRecord { variant: VariantId(2), score: f64::NAN }];
        assert!(matches!(c.ingest(&not_finite), Err(EngineError::InvalidLabel { .. })));

        let twice = [LabelRecord { variant: VariantId(3), score: 1.0 }, LabelRecord { variant: VariantId(3), score: 1.5 }];
        assert!(matches!(c.ingest(&twice), Err(EngineError::DuplicateLabel { .. })));

        let unknown = [LabelRecord { variant: VariantId(10_000), score: 1.0 }];
        assert!(matches!(c.ingest(&unknown), Err(EngineError::Validation { .. })));

        assert_eq!(c.status_counts().labeled, 1);
    }

    #[test]
    fn stopped_campaigns_only_take_labels_for_pending_variants() {
        let fixture = Fixture::new();
        let mut c = campaign(2, 2);
        let u = Arc::clone(c.universe());
        c.ingest(&label(&u, 0..5)).unwrap();
        run(&mut c, &fixture).unwrap();
        assert_eq!(c.phase(), Phase::BudgetExhausted);

        let candidate = c.candidates()[0];
        let err = c
            .ingest(&[LabelRecord { variant: candidate, score: 0.0 }])
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        reveal_pending(&mut c);
        assert_eq!(c.status_counts().labeled, 7);
    }

    #[test]
    fn cancellation_keeps_the_round_open() {
        let fixture = Fixture::new();
        let mut c = campaign(10, 2);
        let u = Arc::clone(c.universe());
        c.ingest(&label(&u, 0..5)).unwrap();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = c
            .run_round(&fixture.provider(), &cancel, &ProgressReporter::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert_eq!(c.phase(), Phase::AwaitingLabels { round: 0 });
        assert!(matches!(run(&mut c, &fixture), Ok(RoundOutcome::Selected(_))));
    }

    #[test]
    fn best_label_prefers_the_earlier_variant_on_ties() {
        let mut c = campaign(10, 2);
        c.ingest(&[
            LabelRecord { variant: VariantId(4), score: 2.0 },
            LabelRecord { variant: VariantId(1), score: 2.0 },
            LabelRecord { variant: VariantId(2), score: 1.0 },
        ])
        .unwrap();
        assert_eq!(c.best_label().map(|l| l.variant), Some(VariantId(1)));
    }

    #[test]
    fn recommendations_are_written_as_csv() {
        let fixture = Fixture::new();
        let mut c = campaign(10, 2);
        let u = Arc::clone(c.universe());
        c.ingest(&label(&u, 0..5)).unwrap();
        let RoundOutcome::Selected(report) = run(&mut c, &fixture).unwrap() else {
            panic!("expected a selection");
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("round-0.csv");
        report.write_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "round,rank,variant,sequence,predicted_mean,uncertainty,uncertainty_kind,acquisition_score,model,policy,cv_mse"
        );
        assert_eq!(lines.count(), 2);
    }

    #[test]
    fn in_flight_variants_are_excluded_without_spending_budget() {
        let mut c = campaign(10, 2);
        let u = Arc::clone(c.universe());
        c.ingest(&label(&u, [0])).unwrap();
        assert_eq!(c.mark_in_flight(&[VariantId(3), VariantId(4)]).unwrap(), 2);
        assert_eq!(c.pending(), vec![VariantId(3), VariantId(4)]);
        assert_eq!(c.remaining_budget(), 10);
        assert!(matches!(
            c.mark_in_flight(&[VariantId(0)]),
            Err(EngineError::AlreadyLabeled { .. })
        ));
        c.check_invariants().unwrap();
    }
}
