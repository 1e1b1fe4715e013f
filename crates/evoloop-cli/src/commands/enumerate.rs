use super::{GlobalContext, enumerate_universe, load_config};
use crate::cli::EnumerateArgs;
use crate::config::CacheChoice;
use crate::error::Result;
use evoloop::core::io::reports::write_universe;
use tracing::info;

pub async fn run(args: EnumerateArgs, _context: &GlobalContext) -> Result<()> {
    let mut overrides = args.session.overrides();
    overrides.cache = CacheChoice::InMemory;
    let config = load_config(&args.session, &overrides)?;

    let universe = enumerate_universe(&config)?;
    info!("Writing universe to {:?}", &args.output);
    write_universe(&args.output, &universe)?;

    println!(
        "✓ {} variant(s) of a {}-residue wild type written to: {}",
        universe.len(),
        config.wild_type.len(),
        args.output.display()
    );
    Ok(())
}
