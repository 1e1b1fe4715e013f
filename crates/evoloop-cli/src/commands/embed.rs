use super::{GlobalContext, build_backend, close_cache, enumerate_universe, load_config, open_cache};
use crate::cli::EmbedArgs;
use crate::error::Result;
use evoloop::core::models::variant::Variant;
use evoloop::engine::embedding::{EmbeddingProvider, export_embeddings_csv};
use tracing::{info, warn};

pub async fn run(args: EmbedArgs, context: &GlobalContext) -> Result<()> {
    let mut overrides = args.session.overrides();
    overrides.embedding_batch_size = args.batch_size;
    let config = load_config(&args.session, &overrides)?;

    let universe = enumerate_universe(&config)?;
    let embedding = config.campaign.embedding.clone();
    let backend = build_backend(&config.backend, embedding.mode, &universe)?;
    let cache = open_cache(&config.cache)?;
    let reporter = context.reporter();

    println!(
        "Embedding {} variant(s) with '{}' ({} mode)...",
        universe.len(),
        backend.model_id(),
        embedding.mode
    );

    let variants: Vec<&Variant> = universe.variants().iter().collect();
    let report = {
        let provider = EmbeddingProvider::new(backend.as_ref(), &cache, embedding);
        tokio::task::block_in_place(|| provider.embed(&variants, &context.cancel, &reporter))?
    };

    for (index, error) in report.failures.iter().take(10) {
        warn!(variant = %variants[*index].descriptor(), %error, "No embedding produced.");
    }
    if report.failures.len() > 10 {
        warn!("... and {} more failure(s).", report.failures.len() - 10);
    }

    if let Some(path) = &args.export {
        let written = export_embeddings_csv(path, &variants, &report)?;
        info!("Exported {} embedding(s) to {:?}", written, path);
        println!("✓ {} embedding(s) exported to: {}", written, path.display());
    }

    close_cache(cache)?;

    println!(
        "✓ Embedded {}/{} variant(s): {} from cache, {} computed, {} failed.",
        report.succeeded(),
        variants.len(),
        report.hits,
        report.computed,
        report.failures.len()
    );
    if report.was_cancelled() {
        println!("Warning: embedding was interrupted; rerun to fill in the rest from the cache.");
    }
    Ok(())
}
