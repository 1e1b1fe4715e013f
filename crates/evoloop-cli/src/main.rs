mod cache_dir;
mod cli;
mod commands;
mod config;
mod error;
mod logging;
mod utils;

use crate::cli::{Cli, Commands};
use crate::commands::GlobalContext;
use crate::error::{CliError, Result};
use clap::Parser;
use evoloop::engine::embedding::CancelFlag;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    if let Err(e) = run_app().await {
        eprintln!("\n❌ Error: {}", e);
        std::process::exit(1);
    }
}

/// Cancels in-flight embedding on the first Ctrl-C; the round in progress stops at the next
/// batch boundary and the cache keeps what was already computed.
fn install_interrupt_handler(cancel: CancelFlag) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received; finishing the current batch before stopping.");
                cancel.cancel();
            }
            Err(e) => warn!("Could not listen for Ctrl-C: {}", e),
        }
    });
}

async fn run_app() -> Result<()> {
    let cli = Cli::parse();
    logging::setup_logging(cli.verbose, cli.quiet, cli.log_file.as_deref())?;

    let (panic_hook, eyre_hook) = color_eyre::config::HookBuilder::default().into_hooks();
    eyre_hook.install().map_err(|e| CliError::Other(e.into()))?;
    std::panic::set_hook(Box::new(move |pi| {
        error!("{}", panic_hook.panic_report(pi));
    }));

    let context = GlobalContext {
        quiet: cli.quiet,
        cancel: CancelFlag::new(),
    };
    install_interrupt_handler(context.cancel.clone());

    let command_result = async {
        info!("🚀 evoloop CLI v{} starting up.", env!("CARGO_PKG_VERSION"));
        debug!("Full CLI arguments parsed: {:?}", &cli);

        if let Some(num_threads) = cli.threads {
            info!(
                "Setting Rayon global thread pool to {} threads.",
                num_threads
            );
            rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build_global()
                .map_err(|e| {
                    CliError::Other(anyhow::anyhow!("Failed to build global thread pool: {}", e))
                })?;
        }

        match cli.command {
            Commands::Enumerate(args) => {
                info!("Dispatching to 'enumerate' command.");
                commands::enumerate::run(args, &context).await
            }
            Commands::Embed(args) => {
                info!("Dispatching to 'embed' command.");
                commands::embed::run(args, &context).await
            }
            Commands::Recommend(args) => {
                info!("Dispatching to 'recommend' command.");
                commands::recommend::run(args, &context).await
            }
            Commands::Benchmark(args) => {
                info!("Dispatching to 'benchmark' command.");
                commands::benchmark::run(args, &context).await
            }
            Commands::Cache(args) => {
                info!("Dispatching to 'cache' command.");
                commands::cache::run(args).await
            }
        }
    }
    .await;

    match &command_result {
        Ok(_) => info!("✅ Command completed successfully."),
        Err(e) => error!("❌ Command failed: {}", e),
    }

    command_result
}
