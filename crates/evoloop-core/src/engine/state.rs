use super::acquisition::{AcquisitionPolicy, Selection};
use super::surrogate::ModelSnapshot;
use crate::core::io::labels::LabelRecord;
use crate::core::io::ledger::LedgerEntry;
use crate::core::models::ids::VariantId;
use std::fmt;
use std::sync::Arc;

/// Where a campaign is in its round cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingLabels { round: usize },
    Training { round: usize },
    Scoring { round: usize },
    Selecting { round: usize },
    Converged,
    BudgetExhausted,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Converged | Phase::BudgetExhausted)
    }

    pub fn round(&self) -> Option<usize> {
        match *self {
            Phase::AwaitingLabels { round }
            | Phase::Training { round }
            | Phase::Scoring { round }
            | Phase::Selecting { round } => Some(round),
            Phase::Converged | Phase::BudgetExhausted => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::AwaitingLabels { round } => write!(f, "awaiting labels for round {round}"),
            Phase::Training { round } => write!(f, "training in round {round}"),
            Phase::Scoring { round } => write!(f, "scoring in round {round}"),
            Phase::Selecting { round } => write!(f, "selecting in round {round}"),
            Phase::Converged => f.write_str("converged"),
            Phase::BudgetExhausted => f.write_str("out of budget"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VariantStatus {
    Candidate,
    /// Selected in `round`, label not yet received.
    Pending { round: usize },
    Labeled { score: f64 },
}

impl VariantStatus {
    pub fn is_candidate(&self) -> bool {
        matches!(self, VariantStatus::Candidate)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, VariantStatus::Pending { .. })
    }

    pub fn score(&self) -> Option<f64> {
        match self {
            VariantStatus::Labeled { score } => Some(*score),
            _ => None,
        }
    }
}

/// A closed selection round. Never modified after it is appended to the campaign.
#[derive(Debug, Clone)]
pub struct Round {
    pub index: usize,
    /// Labels known when the round started, in enumeration order.
    pub labels_at_start: Vec<LabelRecord>,
    pub best_at_start: Option<f64>,
    /// Picks in rank order.
    pub selected: Vec<Selection>,
    pub snapshot: Arc<ModelSnapshot>,
    pub policy: AcquisitionPolicy,
    /// Candidates scored by the model.
    pub scored: usize,
    /// Variants (labeled or candidate) that could not be embedded.
    pub embedding_failures: usize,
}

impl Round {
    pub fn summary(&self) -> RoundSummary {
        RoundSummary {
            index: self.index,
            best_at_start: self.best_at_start,
            selected: self.selected.iter().map(|s| s.variant).collect(),
        }
    }
}

/// The part of a closed round that outlives the process that ran it.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundSummary {
    pub index: usize,
    pub best_at_start: Option<f64>,
    /// Picks in rank order.
    pub selected: Vec<VariantId>,
}

impl RoundSummary {
    /// Groups ledger entries into rounds ordered by index, picks ordered by rank.
    pub fn from_ledger(entries: &[LedgerEntry]) -> Vec<RoundSummary> {
        let mut sorted = entries.to_vec();
        sorted.sort_by_key(|e| (e.round, e.rank));
        let mut rounds: Vec<RoundSummary> = Vec::new();
        for entry in sorted {
            match rounds.last_mut() {
                Some(last) if last.index == entry.round => last.selected.push(entry.variant),
                _ => rounds.push(RoundSummary {
                    index: entry.round,
                    best_at_start: entry.best_at_start,
                    selected: vec![entry.variant],
                }),
            }
        }
        rounds
    }

    pub fn ledger_entries(&self) -> impl Iterator<Item = LedgerEntry> + '_ {
        self.selected
            .iter()
            .enumerate()
            .map(|(i, variant)| LedgerEntry {
                round: self.index,
                rank: i + 1,
                variant: *variant,
                best_at_start: self.best_at_start,
            })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub candidates: usize,
    pub pending: usize,
    pub labeled: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.candidates + self.pending + self.labeled
    }
}
