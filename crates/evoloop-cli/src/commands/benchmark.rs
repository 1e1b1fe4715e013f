use super::{GlobalContext, build_backend, close_cache, load_config, open_cache};
use crate::cli::BenchmarkArgs;
use crate::config::PartialCampaignConfig;
use crate::error::{CliError, Result};
use evoloop::core::io::labels::read_raw_labels;
use evoloop::engine::embedding::EmbeddingProvider;
use evoloop::workflows::benchmark::{self, BenchmarkConfig, Dataset};
use std::path::Path;
use tracing::info;

fn config_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

pub async fn run(args: BenchmarkArgs, context: &GlobalContext) -> Result<()> {
    let mut overrides = args.session.overrides();
    overrides.repeats = args.repeats;
    overrides.initial_samples = args.initial_samples;
    overrides.seed = args.seed;
    let config = load_config(&args.session, &overrides)?;

    info!("Reading benchmark dataset from {:?}", &args.dataset);
    let raw = read_raw_labels(&args.dataset)?;
    let dataset = Dataset::from_raw(&config.wild_type, &raw)?;
    if dataset.is_empty() {
        return Err(CliError::Argument(format!(
            "Dataset '{}' contains no variants.",
            args.dataset.display()
        )));
    }

    let settings = &config.benchmark;
    let mut configs = vec![BenchmarkConfig {
        name: config_name(&args.session.config),
        campaign: config.campaign.clone(),
        initial_samples: settings.initial_samples,
        repeats: settings.repeats,
        seed: settings.seed,
    }];
    for path in &args.compare {
        info!("Loading comparison configuration from {:?}", path);
        let mut campaign = PartialCampaignConfig::from_file(path)?.resolve_campaign(&overrides)?;
        campaign.embedding = config.campaign.embedding.clone();
        configs.push(BenchmarkConfig {
            name: config_name(path),
            campaign,
            initial_samples: settings.initial_samples,
            repeats: settings.repeats,
            seed: settings.seed,
        });
    }

    let backend = build_backend(
        &config.backend,
        config.campaign.embedding.mode,
        dataset.universe(),
    )?;
    let cache = open_cache(&config.cache)?;
    let reporter = context.reporter();

    println!(
        "Benchmarking {} configuration(s) on {} variant(s), {} repeat(s) each...",
        configs.len(),
        dataset.len(),
        settings.repeats
    );

    let report = {
        let provider =
            EmbeddingProvider::new(backend.as_ref(), &cache, config.campaign.embedding.clone());
        tokio::task::block_in_place(|| match configs.as_slice() {
            [single] => benchmark::run(&dataset, &provider, single, &context.cancel, &reporter),
            all => benchmark::compare(&dataset, &provider, all, &context.cancel, &reporter),
        })
    };
    close_cache(cache)?;
    let report = report?;

    report.write_csv(&args.output)?;

    let optimum = dataset.best();
    println!(
        "{:<24} {:>8} {:>12} {:>10} {:>8}",
        "config", "repeats", "final best", "spearman", "found"
    );
    for summary in report.summarize(optimum) {
        println!(
            "{:<24} {:>8} {:>12.4} {:>10} {:>8}",
            summary.config,
            summary.repeats,
            summary.mean_final_best,
            summary
                .mean_final_spearman
                .map(|rho| format!("{rho:.3}"))
                .unwrap_or_else(|| "n/a".to_string()),
            format!("{}/{}", summary.found_optimum, summary.repeats)
        );
    }
    println!(
        "✓ {} row(s) written to: {}",
        report.rows.len(),
        args.output.display()
    );
    Ok(())
}
