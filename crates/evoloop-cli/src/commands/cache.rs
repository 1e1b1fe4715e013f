use crate::cache_dir::CacheLocation;
use crate::cli::{CacheArgs, CacheCommands};
use crate::error::Result;
use evoloop::engine::cache::RepresentationCache;
use evoloop::engine::config::CacheConfig;
use std::io::{self, BufRead, Write};
use std::path::Path;
use tracing::info;

pub async fn run(args: CacheArgs) -> Result<()> {
    match args.command {
        CacheCommands::Path { cache } => handle_path(cache.as_deref()),
        CacheCommands::Stats { cache } => handle_stats(cache.as_deref()),
        CacheCommands::Clear { cache, yes } => handle_clear(cache.as_deref(), yes),
    }
}

fn open_existing(location: &CacheLocation) -> Result<RepresentationCache> {
    let config = CacheConfig {
        path: Some(location.path().to_path_buf()),
        tolerate_store_failure: false,
        ..Default::default()
    };
    Ok(RepresentationCache::open(&config)?)
}

fn handle_path(cache: Option<&Path>) -> Result<()> {
    let location = CacheLocation::resolve(cache)?;
    println!("{}", location.path().display());
    Ok(())
}

fn handle_stats(cache: Option<&Path>) -> Result<()> {
    let location = CacheLocation::resolve(cache)?;
    if !location.exists() {
        println!("No cache found at {}", location.path().display());
        return Ok(());
    }
    let stats = open_existing(&location)?.stats()?;
    println!("Cache:       {}", location.path().display());
    println!("Embeddings:  {}", stats.persisted);
    if let Ok(metadata) = std::fs::metadata(location.path()) {
        println!("Size:        {:.1} MiB", metadata.len() as f64 / (1024.0 * 1024.0));
    }
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn handle_clear(cache: Option<&Path>, yes: bool) -> Result<()> {
    let location = CacheLocation::resolve(cache)?;
    if !location.exists() {
        println!("No cache found at {}", location.path().display());
        return Ok(());
    }
    if !yes && !confirm(&format!("Delete every embedding in {}?", location.path().display()))? {
        println!("Aborted.");
        return Ok(());
    }
    let removed = open_existing(&location)?.clear()?;
    info!(removed, "Cache cleared.");
    println!("✓ Removed {} embedding(s).", removed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn clear_and_stats_ignore_a_missing_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.sqlite");
        handle_stats(Some(&path)).unwrap();
        handle_clear(Some(&path), true).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn clear_empties_an_existing_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("emb.sqlite");
        let location = CacheLocation::resolve(Some(&path)).unwrap();
        drop(open_existing(&location).unwrap());
        assert!(location.exists());

        handle_clear(Some(&path), true).unwrap();
        assert_eq!(open_existing(&location).unwrap().stats().unwrap().persisted, 0);
    }
}
