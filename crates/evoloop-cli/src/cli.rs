use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "Evoloop Developers",
    version,
    about = "evoloop - Active-learning selection of protein variants: embed the mutant space, train a surrogate on measured fitness, and recommend the next batch to test.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads for training and scoring.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write the candidate mutant universe described by a config file as CSV.
    Enumerate(EnumerateArgs),
    /// Compute embeddings for the whole universe, filling the representation cache.
    Embed(EmbedArgs),
    /// Run one selection round on the labels measured so far and write the recommendations.
    Recommend(RecommendArgs),
    /// Replay a fully labeled dataset round by round to evaluate selection strategies.
    Benchmark(BenchmarkArgs),
    /// Inspect or clear the persistent representation cache.
    Cache(CacheArgs),
}

/// Options shared by every command that reads a campaign config file.
#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    /// Path to the campaign configuration file in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub config: PathBuf,

    /// Use this cache database instead of the default location.
    #[arg(long, value_name = "PATH", conflicts_with = "no_cache")]
    pub cache: Option<PathBuf>,

    /// Keep embeddings in memory only for this run.
    #[arg(long)]
    pub no_cache: bool,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S acquisition.batch-size=12
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

#[derive(Args, Debug)]
pub struct EnumerateArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// Output CSV path (`id,variant,order,sequence`).
    #[arg(short, long, required = true, value_name = "PATH")]
    pub output: PathBuf,
}

#[derive(Args, Debug)]
pub struct EmbedArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// Also write the embeddings as a CSV table (descriptor, then one column per dimension).
    #[arg(long, value_name = "PATH")]
    pub export: Option<PathBuf>,

    /// Override `embedding.batch-size` from the config file.
    #[arg(short, long, value_name = "INT")]
    pub batch_size: Option<usize>,
}

#[derive(Args, Debug)]
pub struct RecommendArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// CSV of measured variants with columns `variant,score` (or `variant,activity`).
    #[arg(short, long, required = true, value_name = "PATH")]
    pub labels: PathBuf,

    /// CSV with a `variant` column listing variants already sent for measurement.
    #[arg(short, long, value_name = "PATH")]
    pub pending: Option<PathBuf>,

    /// Round ledger recording what earlier rounds selected; read before the round and
    /// rewritten after it. Defaults to `<labels>.rounds.csv` next to the labels file.
    #[arg(long, value_name = "PATH")]
    pub ledger: Option<PathBuf>,

    /// Output CSV path for the recommended batch.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub output: PathBuf,

    /// Override the acquisition policy, e.g. `exploit`, `ucb:2.0`, `diverse:3`.
    #[arg(long, value_name = "POLICY")]
    pub policy: Option<String>,

    /// Override `acquisition.batch-size` from the config file.
    #[arg(short = 'k', long, value_name = "INT")]
    pub batch_size: Option<usize>,

    /// Override `model.family` (`ridge` or `random-forest`).
    #[arg(short, long, value_name = "FAMILY")]
    pub model: Option<String>,
}

#[derive(Args, Debug)]
pub struct BenchmarkArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// Fully labeled dataset CSV (`variant,score`); its variants form the universe.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub dataset: PathBuf,

    /// Output CSV with one row per configuration, repeat and round.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub output: PathBuf,

    /// Additional config files to compare against the main one. Each is named after its
    /// file stem and shares the wild type, embedding and cache settings of the main config.
    #[arg(long, value_name = "PATH", num_args(1..))]
    pub compare: Vec<PathBuf>,

    /// Override `benchmark.repeats` from the config file.
    #[arg(short, long, value_name = "INT")]
    pub repeats: Option<usize>,

    /// Override `benchmark.initial-samples` from the config file.
    #[arg(long, value_name = "INT")]
    pub initial_samples: Option<usize>,

    /// Override `benchmark.seed` from the config file.
    #[arg(long, value_name = "INT")]
    pub seed: Option<u64>,
}

#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommands,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show the absolute path of the cache database.
    Path {
        #[arg(long, value_name = "PATH")]
        cache: Option<PathBuf>,
    },
    /// Show the number of stored embeddings.
    Stats {
        #[arg(long, value_name = "PATH")]
        cache: Option<PathBuf>,
    },
    /// Delete every stored embedding.
    Clear {
        #[arg(long, value_name = "PATH")]
        cache: Option<PathBuf>,
        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },
}
