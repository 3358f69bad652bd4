use std::path::PathBuf;

use catseek::{
    crawl::{DEFAULT_CONCURRENCY, DEFAULT_MAX_PAGES, DEFAULT_START_URL},
    embedding::DEFAULT_BATCH_SIZE,
    fetch::DEFAULT_RETRY_LIMIT,
    model_manager::DeviceChoice,
};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "catseek",
    about = "Crawl an assessment catalog and recommend entries for a query"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true, env = "CATSEEK_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Bi-encoder model ID (HuggingFace) or local model path
    #[arg(long, global = true, env = "CATSEEK_EMBEDDING_MODEL")]
    pub embedding_model: Option<String>,

    /// Cross-encoder model ID (HuggingFace) or local model path
    #[arg(long, global = true, env = "CATSEEK_RERANKER_MODEL")]
    pub reranker_model: Option<String>,

    /// Compute device for model inference
    #[arg(long, global = true, value_enum, env = "CATSEEK_DEVICE")]
    pub device: Option<DeviceChoice>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Crawl the catalog listing and detail pages into a catalog file
    Crawl(CrawlArgs),
    /// Build the vector index and metadata from the catalog (full rebuild)
    Index(IndexArgs),
    /// Recommend catalog entries for a free-text query
    Search(SearchArgs),
    /// Show artifact locations, counts and integrity
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Crawl --

#[derive(Debug, Parser)]
pub struct CrawlArgs {
    /// First listing page
    #[arg(
        long,
        env = "CATSEEK_START_URL",
        default_value = DEFAULT_START_URL
    )]
    pub start_url: url::Url,

    /// Maximum detail fetches in flight
    #[arg(
        long,
        env = "CATSEEK_CONCURRENCY",
        default_value_t = DEFAULT_CONCURRENCY
    )]
    pub concurrency: usize,

    /// Attempts per page before giving up
    #[arg(
        long,
        env = "CATSEEK_RETRY_LIMIT",
        default_value_t = DEFAULT_RETRY_LIMIT
    )]
    pub retries: u32,

    /// Per-attempt timeout in seconds
    #[arg(long, env = "CATSEEK_TIMEOUT_SECS", default_value_t = 15)]
    pub timeout_secs: u64,

    /// Stop after this many listing pages
    #[arg(
        long,
        env = "CATSEEK_MAX_PAGES",
        default_value_t = DEFAULT_MAX_PAGES
    )]
    pub max_pages: usize,

    /// Where to write the catalog (defaults to <data-dir>/catalog.json)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Hide the detail-fetch progress bar
    #[arg(long)]
    pub no_progress: bool,
}

// -- Index --

#[derive(Debug, Parser)]
pub struct IndexArgs {
    /// Catalog to index (defaults to <data-dir>/catalog.json)
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Texts embedded per model call
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return (1 to 10)
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "catseek",
            &mut std::io::stdout(),
        );
    }
}
