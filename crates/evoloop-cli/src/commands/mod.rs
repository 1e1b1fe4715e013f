pub mod benchmark;
pub mod cache;
pub mod embed;
pub mod enumerate;
pub mod recommend;

use crate::cli::SessionArgs;
use crate::config::{BackendSource, CacheChoice, CliOverrides, PartialCampaignConfig, ResolvedConfig};
use crate::error::Result;
use crate::utils::progress::CliProgressHandler;
use evoloop::core::mutants::{self, MutantUniverse};
use evoloop::engine::cache::RepresentationCache;
use evoloop::engine::config::CacheConfig;
use evoloop::engine::embedding::backends::{OneHotBackend, TableBackend};
use evoloop::engine::embedding::{CancelFlag, InferenceBackend, RepresentationMode};
use evoloop::engine::error::EngineError;
use evoloop::engine::progress::ProgressReporter;
use std::sync::Arc;
use tracing::{info, warn};

/// Flags every command receives from the top-level parser.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    pub quiet: bool,
    pub cancel: CancelFlag,
}

impl GlobalContext {
    pub fn reporter(&self) -> ProgressReporter<'static> {
        let handler = if self.quiet {
            CliProgressHandler::hidden()
        } else {
            CliProgressHandler::new()
        };
        ProgressReporter::with_callback(handler.get_callback())
    }
}

impl SessionArgs {
    pub fn cache_choice(&self) -> CacheChoice {
        match (&self.cache, self.no_cache) {
            (_, true) => CacheChoice::InMemory,
            (Some(path), false) => CacheChoice::Path(path.clone()),
            (None, false) => CacheChoice::FromConfig,
        }
    }

    /// Overrides carrying only the session flags; commands add their own on top.
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            set_values: self.set_values.clone(),
            cache: self.cache_choice(),
            ..Default::default()
        }
    }
}

pub fn load_config(args: &SessionArgs, overrides: &CliOverrides) -> Result<ResolvedConfig> {
    let partial = PartialCampaignConfig::from_file(&args.config)?;
    info!("Merging configuration from file and CLI arguments...");
    partial.merge_with_cli(overrides)
}

pub fn enumerate_universe(config: &ResolvedConfig) -> Result<Arc<MutantUniverse>> {
    let universe =
        mutants::enumerate(&config.wild_type, &config.mutations).map_err(EngineError::from)?;
    info!(
        policy = config.mutations.name(),
        variants = universe.len(),
        "Mutant universe ready."
    );
    Ok(Arc::new(universe))
}

pub fn build_backend(
    source: &BackendSource,
    mode: RepresentationMode,
    universe: &MutantUniverse,
) -> Result<Box<dyn InferenceBackend>> {
    Ok(match source {
        BackendSource::OneHot { max_length } => Box::new(OneHotBackend::new(*max_length)),
        BackendSource::Table { path, model_id } => {
            info!("Loading representation table from {:?}", path);
            let table = TableBackend::load(path, model_id.as_str(), mode, universe)?;
            if table.is_empty() {
                warn!("The representation table matched no member of the universe.");
            }
            Box::new(table)
        }
    })
}

pub fn open_cache(config: &CacheConfig) -> Result<RepresentationCache> {
    let cache = RepresentationCache::open(config)?;
    if cache.is_degraded() {
        println!("Warning: the embedding cache is unavailable; embeddings will not be persisted.");
    }
    Ok(cache)
}

/// Flushes the cache and logs what this run did with it.
pub fn close_cache(cache: RepresentationCache) -> Result<()> {
    let stats = cache.close()?;
    info!(
        hits = stats.hits,
        misses = stats.misses,
        persisted = stats.persisted,
        degraded = stats.degraded,
        "Representation cache closed."
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn session(cache: Option<&str>, no_cache: bool) -> SessionArgs {
        SessionArgs {
            config: PathBuf::from("campaign.toml"),
            cache: cache.map(PathBuf::from),
            no_cache,
            set_values: vec!["stopping.budget=4".to_string()],
        }
    }

    #[test]
    fn cache_choice_follows_session_flags() {
        assert_eq!(session(None, false).cache_choice(), CacheChoice::FromConfig);
        assert_eq!(session(None, true).cache_choice(), CacheChoice::InMemory);
        assert_eq!(
            session(Some("emb.sqlite"), false).cache_choice(),
            CacheChoice::Path(PathBuf::from("emb.sqlite"))
        );
    }

    #[test]
    fn overrides_carry_set_values() {
        let overrides = session(None, true).overrides();
        assert_eq!(overrides.set_values, vec!["stopping.budget=4".to_string()]);
        assert!(overrides.policy.is_none());
    }
}
