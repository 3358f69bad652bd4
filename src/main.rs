use std::time::Duration;

use catseek::{
    DataDir,
    ModelManager,
    Result,
    SearchHandle,
    Searcher,
    catalog::read_catalog,
    crawl::{CrawlConfig, CrawlReport, Crawler},
    fetch::{FetchConfig, Fetcher},
    indexer::{build_index, load_index},
    search,
};
use clap::Parser;
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, CrawlArgs, IndexArgs, SearchArgs};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("CATSEEK_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let models = model_manager(&cli);

    match &cli.command {
        Command::Crawl(args) => cmd_crawl(&data_dir, args)?,
        Command::Index(args) => cmd_index(&data_dir, &models, args)?,
        Command::Search(args) => cmd_search(&data_dir, &models, args)?,
        Command::Status(args) => cmd_status(&data_dir, &models, args.json)?,
        Command::Completions(_) => {}
    }

    Ok(())
}

fn model_manager(cli: &Cli) -> ModelManager {
    let mut models = ModelManager::new();
    if let Some(id) = &cli.embedding_model {
        models = models.with_embedding_model(id.clone());
    }
    if let Some(id) = &cli.reranker_model {
        models = models.with_reranker_model(id.clone());
    }
    if let Some(device) = cli.device {
        models = models.with_device(device);
    }
    models
}

fn cmd_crawl(data_dir: &DataDir, args: &CrawlArgs) -> Result<()> {
    let fetcher = Fetcher::new(FetchConfig {
        retry_limit: args.retries.max(1),
        timeout: Duration::from_secs(args.timeout_secs.max(1)),
        ..FetchConfig::default()
    })?;
    let config = CrawlConfig {
        start_url: args.start_url.clone(),
        concurrency: args.concurrency.max(1),
        max_pages: args.max_pages.max(1),
        show_progress: !args.no_progress,
    };
    let output = args.output.clone().unwrap_or_else(|| data_dir.catalog());

    let mut crawler = Crawler::new(fetcher, config);
    let stop = crawler.stop_signal();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(async {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("stop requested, letting in-flight requests finish");
                stop.request();
            }
        });
        crawler.crawl_to_file(&output).await
    })?;

    print_crawl_summary(&report);
    eprintln!("Catalog written to {}", output.display());
    Ok(())
}

fn print_crawl_summary(report: &CrawlReport) {
    eprintln!(
        "Crawled {} listing page(s), {} row(s)",
        report.pages, report.rows
    );
    eprintln!(
        "  {} complete, {} listing-only",
        report.complete,
        report.degraded + report.skipped
    );
    if report.duplicates > 0 {
        eprintln!("  {} duplicate row(s) dropped", report.duplicates);
    }
    if report.stopped {
        eprintln!("  Stopped early; the catalog is partial.");
    }
}

fn cmd_index(
    data_dir: &DataDir,
    models: &ModelManager,
    args: &IndexArgs,
) -> Result<()> {
    let catalog = args.catalog.clone().unwrap_or_else(|| data_dir.catalog());
    let records = read_catalog(&catalog)?;
    eprintln!(
        "Loaded {} record(s) from {}",
        records.len(),
        catalog.display()
    );

    let embedder = models.load_embedder()?;
    let info = build_index(
        &records,
        &embedder,
        &data_dir.index_paths(),
        args.batch_size.max(1),
        true,
    )?;

    eprintln!(
        "Indexed {} record(s) with {} ({} dimensions)",
        info.record_count, info.embedding_model, info.dimension
    );
    Ok(())
}

fn cmd_search(
    data_dir: &DataDir,
    models: &ModelManager,
    args: &SearchArgs,
) -> Result<()> {
    let paths = data_dir.index_paths();
    let handle = SearchHandle::new();
    handle.initialize(|| Searcher::open(&paths, models))?;

    let results = handle.search(&args.query, args.count)?;
    if args.json {
        search::format_json(&results, &args.query)?;
    } else {
        search::format_human(&results);
    }
    Ok(())
}

#[derive(Serialize)]
struct Artifact {
    path: String,
    present: bool,
}

impl Artifact {
    fn at(path: &std::path::Path) -> Self {
        Self {
            path: path.display().to_string(),
            present: path.is_file(),
        }
    }
}

#[derive(Serialize)]
struct Status {
    data_dir: String,
    catalog: Artifact,
    catalog_records: Option<usize>,
    vectors: Artifact,
    metadata: Artifact,
    indexed_records: Option<usize>,
    indexed_with: Option<String>,
    integrity: String,
    embedding_model: String,
    reranker_model: String,
    device: String,
}

fn cmd_status(
    data_dir: &DataDir,
    models: &ModelManager,
    json: bool,
) -> Result<()> {
    let paths = data_dir.index_paths();
    let catalog = data_dir.catalog();

    let catalog_records = catalog
        .is_file()
        .then(|| read_catalog(&catalog).ok().map(|r| r.len()))
        .flatten();

    let (indexed_records, indexed_with, integrity) = if !paths.exist() {
        (None, None, "not built".to_string())
    } else {
        match load_index(&paths) {
            Ok(index) => (
                Some(index.records.len()),
                Some(index.info.embedding_model),
                "ok".to_string(),
            ),
            Err(e) => (None, None, e.to_string()),
        }
    };

    let status = Status {
        data_dir: data_dir.root().display().to_string(),
        catalog: Artifact::at(&catalog),
        catalog_records,
        vectors: Artifact::at(&paths.vectors),
        metadata: Artifact::at(&paths.metadata),
        indexed_records,
        indexed_with,
        integrity,
        embedding_model: models.embedding_model_id().to_string(),
        reranker_model: models.reranker_model_id().to_string(),
        device: models.device().to_string(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Data directory: {}", status.data_dir);
    println!(
        "Catalog: {} ({})",
        status.catalog.path,
        count_or_missing(status.catalog.present, status.catalog_records)
    );
    println!("Vector index: {}", status.vectors.path);
    println!("Metadata: {}", status.metadata.path);
    println!(
        "Indexed records: {}",
        count_or_missing(paths.exist(), status.indexed_records)
    );
    if let Some(model) = &status.indexed_with {
        println!("Indexed with: {model}");
    }
    println!("Integrity: {}", status.integrity);
    println!("Embedding model: {}", status.embedding_model);
    println!("Reranker model: {}", status.reranker_model);
    println!("Device: {}", status.device);
    Ok(())
}

fn count_or_missing(present: bool, count: Option<usize>) -> String {
    match (present, count) {
        (false, _) => "missing".to_string(),
        (true, Some(n)) => format!("{n} record(s)"),
        (true, None) => "unreadable".to_string(),
    }
}
