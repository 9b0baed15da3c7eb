//! CLI for the book-search workflow

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use booksearch_workflow::config::SearchMode;
use booksearch_workflow::{
    server, IndexSpec, MetricType, SearchResult, Workflow, WorkflowConfig,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "booksearch")]
#[command(about = "Book search demo against a vector database", long_about = None)]
struct Cli {
    /// Service endpoint, `host:port` or a URL
    #[arg(long, global = true, env = "BOOKSEARCH_ENDPOINT")]
    endpoint: Option<String>,

    /// Bearer token for the service
    #[arg(long, global = true, env = "BOOKSEARCH_TOKEN")]
    token: Option<String>,

    /// Collection to work on
    #[arg(long, global = true)]
    collection: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, fill, index, load and query the book collection
    Run(RunArgs),
    /// Start a local in-memory development server
    Serve {
        /// Address to bind to
        #[arg(long, default_value = "127.0.0.1:19530")]
        addr: String,
    },
}

#[derive(Args)]
struct RunArgs {
    /// JSON config file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Partition to insert into, created if missing
    #[arg(long)]
    partition: Option<String>,

    /// Index algorithm
    #[arg(long, value_enum)]
    index: Option<IndexKind>,

    /// Distance metric
    #[arg(long, value_enum)]
    metric: Option<Metric>,

    /// Which searches to run
    #[arg(long, value_enum)]
    search: Option<SearchKind>,

    /// Restrict searches to a partition; repeat for several
    #[arg(long = "search-partition")]
    search_partitions: Vec<String>,

    /// Filter expression for the filtered search (e.g. "word_count <= 11000")
    #[arg(long)]
    filter: Option<String>,

    /// Number of results per query
    #[arg(long)]
    top_k: Option<usize>,

    /// Query vector as comma-separated values (e.g. "0.1,0.2")
    #[arg(long)]
    query: Option<String>,

    /// Number of synthetic rows to insert
    #[arg(long)]
    rows: Option<usize>,

    /// Seed for the synthetic vectors
    #[arg(long)]
    seed: Option<u64>,

    /// Search deadline in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Drop the collection when done
    #[arg(long)]
    drop_after: bool,
}

#[derive(ValueEnum, Clone, Copy)]
enum IndexKind {
    Flat,
    IvfFlat,
    Hnsw,
}

#[derive(ValueEnum, Clone, Copy)]
enum Metric {
    L2,
    Ip,
    Cosine,
}

#[derive(ValueEnum, Clone, Copy)]
enum SearchKind {
    Plain,
    Filtered,
    Both,
}

impl From<Metric> for MetricType {
    fn from(metric: Metric) -> Self {
        match metric {
            Metric::L2 => MetricType::L2,
            Metric::Ip => MetricType::IP,
            Metric::Cosine => MetricType::Cosine,
        }
    }
}

impl From<SearchKind> for SearchMode {
    fn from(kind: SearchKind) -> Self {
        match kind {
            SearchKind::Plain => SearchMode::Plain,
            SearchKind::Filtered => SearchMode::Filtered,
            SearchKind::Both => SearchMode::Both,
        }
    }
}

fn build_config(cli: &Cli, args: &RunArgs) -> Result<WorkflowConfig> {
    let mut config = match &args.config {
        Some(path) => WorkflowConfig::from_file(path)?,
        None => WorkflowConfig::default(),
    };

    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = endpoint.clone();
    }
    if cli.token.is_some() {
        config.token = cli.token.clone();
    }
    if let Some(collection) = &cli.collection {
        config.collection = collection.clone();
    }
    if let Some(partition) = &args.partition {
        config.partition = partition.clone();
    }

    let metric = args.metric.map(MetricType::from).unwrap_or(config.index.metric);
    config.index = match args.index {
        Some(IndexKind::Flat) => IndexSpec::flat(metric),
        Some(IndexKind::IvfFlat) => IndexSpec::ivf_flat(metric, 1024)?,
        Some(IndexKind::Hnsw) => IndexSpec::hnsw(metric, 16, 200)?,
        None => IndexSpec {
            metric,
            ..config.index
        },
    };
    if args.index.is_some() {
        // Params tuned for the previous index type no longer apply
        config.search.params = None;
    }

    if let Some(kind) = args.search {
        config.search.mode = kind.into();
    }
    if !args.search_partitions.is_empty() {
        config.search.partitions = args.search_partitions.clone();
    }
    if let Some(filter) = &args.filter {
        config.search.filter = filter.clone();
    }
    if let Some(top_k) = args.top_k {
        config.search.top_k = top_k;
    }
    if let Some(query) = &args.query {
        let query: booksearch_workflow::FloatVector = query.parse()?;
        config.dim = query.dimension();
        config.search.query = query.into_inner();
    }
    if let Some(rows) = args.rows {
        config.rows = rows;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.search.timeout_ms = timeout_ms;
    }
    config.drop_after |= args.drop_after;

    config.validate()?;
    Ok(config)
}

fn print_results(label: &str, results: &[SearchResult]) {
    for (q, result) in results.iter().enumerate() {
        if result.is_empty() {
            println!("{} search, query {}: no results found", label, q);
            continue;
        }
        println!("{} search, query {}: top {} results:", label, q, result.len());
        for (i, hit) in result.hits.iter().enumerate() {
            println!("{}. {} (distance: {:.4})", i + 1, hit.id, hit.distance);
        }
        println!("ids: {:?}", result.ids());
        println!("scores: {:?}", result.scores());
        debug!("{:#?}", result);
    }
}

async fn run(cli: &Cli, args: &RunArgs) -> Result<()> {
    let config = build_config(cli, args)?;
    let report = Workflow::connect(config).await?.run().await?;

    println!(
        "Collection {}; inserted {} rows",
        if report.created { "created" } else { "reused" },
        report.inserted
    );
    if let Some(results) = &report.plain {
        print_results("Plain", results);
    }
    if let Some(results) = &report.filtered {
        print_results("Filtered", results);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let outcome = match &cli.command {
        Commands::Run(args) => run(&cli, args).await,
        Commands::Serve { addr } => server::start(addr).await,
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("booksearch failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
