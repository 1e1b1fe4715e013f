use super::{GlobalContext, build_backend, close_cache, enumerate_universe, load_config, open_cache};
use crate::cli::RecommendArgs;
use crate::error::Result;
use evoloop::core::io::labels::{read_labels, read_variant_ids};
use evoloop::core::io::ledger::{read_ledger, write_ledger};
use evoloop::engine::embedding::EmbeddingProvider;
use evoloop::engine::scheduler::RoundOutcome;
use evoloop::workflows;
use std::path::PathBuf;
use tracing::info;

const PREVIEW_ROWS: usize = 10;

fn ledger_path(args: &RecommendArgs) -> PathBuf {
    args.ledger
        .clone()
        .unwrap_or_else(|| args.labels.with_extension("rounds.csv"))
}

pub async fn run(args: RecommendArgs, context: &GlobalContext) -> Result<()> {
    let mut overrides = args.session.overrides();
    overrides.policy = args.policy.clone();
    overrides.acquisition_batch_size = args.batch_size;
    overrides.model = args.model.clone();
    let config = load_config(&args.session, &overrides)?;

    let universe = enumerate_universe(&config)?;

    info!("Reading labels from {:?}", &args.labels);
    let labels = read_labels(&args.labels, &universe)?;
    let in_flight = match &args.pending {
        Some(path) => {
            info!("Reading in-flight variants from {:?}", path);
            read_variant_ids(path, &universe)?
        }
        None => Vec::new(),
    };
    let ledger_path = ledger_path(&args);
    let history = if ledger_path.exists() {
        info!("Reading round ledger from {:?}", &ledger_path);
        read_ledger(&ledger_path, &universe)?
    } else {
        Vec::new()
    };

    let backend = build_backend(&config.backend, config.campaign.embedding.mode, &universe)?;
    let cache = open_cache(&config.cache)?;
    let reporter = context.reporter();

    println!(
        "Selecting up to {} variant(s) from {} candidate(s) with {} labels...",
        config.campaign.acquisition.batch_size,
        universe.len(),
        labels.len()
    );

    let result = {
        let provider =
            EmbeddingProvider::new(backend.as_ref(), &cache, config.campaign.embedding.clone());
        tokio::task::block_in_place(|| {
            workflows::recommend::run(
                universe.clone(),
                &config.campaign,
                &history,
                &labels,
                &in_flight,
                &provider,
                &context.cancel,
                &reporter,
            )
        })
    };
    close_cache(cache)?;
    let result = result?;

    if let Some(best) = &result.best_label {
        let descriptor = universe
            .descriptor(best.variant)
            .unwrap_or_else(|| best.variant.to_string());
        println!("Best measured so far: {} ({:.4})", descriptor, best.score);
    }

    match &result.outcome {
        RoundOutcome::Selected(report) => {
            report.write_csv(&args.output)?;
            write_ledger(&ledger_path, &result.ledger, &universe)?;
            println!(
                "Round {} closed; {} of {} variant(s) selected so far.",
                report.index(),
                result.ledger.len(),
                config.campaign.stopping.budget
            );
            let snapshot = report.snapshot();
            println!(
                "Model: {} [{}], CV MSE: {}",
                snapshot.family(),
                snapshot.hyperparameters,
                snapshot
                    .cv_mse
                    .map(|mse| format!("{mse:.4}"))
                    .unwrap_or_else(|| "n/a".to_string())
            );
            for rec in report.recommendations.iter().take(PREVIEW_ROWS) {
                println!(
                    "  {:>3}. {:<20} mean {:>9.4}  ±{:<8.4} score {:.4}",
                    rec.rank, rec.variant, rec.predicted_mean, rec.uncertainty, rec.acquisition_score
                );
            }
            if report.recommendations.len() > PREVIEW_ROWS {
                println!("  ... {} more", report.recommendations.len() - PREVIEW_ROWS);
            }
            println!(
                "✓ {} recommendation(s) written to: {}",
                report.recommendations.len(),
                args.output.display()
            );
        }
        RoundOutcome::Converged => {
            println!("The campaign has converged; no further variants were selected.");
        }
        RoundOutcome::BudgetExhausted => {
            println!("No candidates remain within the budget; no variants were selected.");
        }
    }
    info!(
        candidates = result.counts.candidates,
        pending = result.counts.pending,
        labeled = result.counts.labeled,
        "Universe status after the round."
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::SessionArgs;

    fn args(ledger: Option<&str>) -> RecommendArgs {
        RecommendArgs {
            session: SessionArgs {
                config: PathBuf::from("campaign.toml"),
                cache: None,
                no_cache: true,
                set_values: Vec::new(),
            },
            labels: PathBuf::from("data/labels.csv"),
            pending: None,
            ledger: ledger.map(PathBuf::from),
            output: PathBuf::from("next.csv"),
            policy: None,
            batch_size: None,
            model: None,
        }
    }

    #[test]
    fn ledger_defaults_to_a_file_next_to_the_labels() {
        assert_eq!(ledger_path(&args(None)), PathBuf::from("data/labels.rounds.csv"));
        assert_eq!(
            ledger_path(&args(Some("state/rounds.csv"))),
            PathBuf::from("state/rounds.csv")
        );
    }
}
