use crate::core::io::labels::LabelRecord;
use crate::core::io::ledger::LedgerEntry;
use crate::core::models::ids::VariantId;
use crate::core::mutants::MutantUniverse;
use crate::engine::config::{CampaignConfig, PendingPolicy};
use crate::engine::embedding::{CancelFlag, EmbeddingProvider};
use crate::engine::error::EngineError;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::scheduler::{Campaign, RoundOutcome};
use crate::engine::state::{RoundSummary, StatusCounts};
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, Clone)]
pub struct RecommendResult {
    pub outcome: RoundOutcome,
    /// Status of the universe after the round.
    pub counts: StatusCounts,
    pub best_label: Option<LabelRecord>,
    /// Every closed round including this one, to be stored for the next call.
    pub ledger: Vec<LedgerEntry>,
}

/// Runs one live selection round.
///
/// `history` holds the rounds closed by earlier calls, as read back from their ledger; their
/// selections count against the budget and the new round is numbered after them.
/// `in_flight` lists variants already sent for measurement outside the campaign; they are
/// excluded from the pool without waiting for their labels.
#[instrument(skip_all, name = "recommend_workflow")]
pub fn run(
    universe: Arc<MutantUniverse>,
    config: &CampaignConfig,
    history: &[LedgerEntry],
    labels: &[LabelRecord],
    in_flight: &[VariantId],
    provider: &EmbeddingProvider,
    cancel: &CancelFlag,
    reporter: &ProgressReporter,
) -> Result<RecommendResult, EngineError> {
    // === Phase 0: Campaign setup ===
    let mut config = config.clone();
    config.pending_policy = PendingPolicy::AllowPartial;
    let mut campaign = Campaign::resume(universe, config, RoundSummary::from_ledger(history))?;
    {
        let _phase = reporter.phase("Ingesting labels");
        campaign.ingest(labels)?;
        campaign.mark_in_flight(in_flight)?;
    }
    let counts = campaign.status_counts();
    info!(
        round = campaign.history().len(),
        selected_so_far = campaign.total_selected(),
        labeled = counts.labeled,
        pending = counts.pending,
        candidates = counts.candidates,
        "Starting live round."
    );

    // === Phase 1: Selection round ===
    let outcome = campaign.run_round(provider, cancel, reporter)?;
    campaign.check_invariants()?;

    if let RoundOutcome::Selected(report) = &outcome {
        reporter.report(Progress::Message(format!(
            "Recommended {} variant(s)",
            report.recommendations.len()
        )));
    }
    Ok(RecommendResult {
        outcome,
        counts: campaign.status_counts(),
        best_label: campaign.best_label(),
        ledger: campaign.ledger(),
    })
}
