use anyhow::Result;
use bm25_core::eval::QueryOutcome;
use bm25_core::index::{DEFAULT_B, DEFAULT_K1};
use bm25_core::{
    load_or_build, rebuild, Bm25Params, EngineConfig, EvaluationHarness, EvaluationReport, Judgments, Origin,
    SearchError, SearchIndex, SledStore, Stage,
};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

mod ingest;

use ingest::{import_path, ImportOptions};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build, query and evaluate a BM25 index", long_about = None)]
struct Cli {
    #[command(flatten)]
    engine: EngineArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct EngineArgs {
    /// Document store directory
    #[arg(long, global = true, env = "BM25_STORE", default_value = "./store")]
    store: PathBuf,
    /// Index cache file
    #[arg(long, global = true, env = "BM25_CACHE", default_value = "./bm25.cache")]
    cache: PathBuf,
    /// Term-frequency saturation [default: 1.5]
    #[arg(long, global = true, env = "BM25_K1")]
    k1: Option<f64>,
    /// Length-normalization strength in [0, 1] [default: 0.75]
    #[arg(long, global = true, env = "BM25_B")]
    b: Option<f64>,
    /// Documents fetched from the store per batch
    #[arg(long, global = true, env = "BM25_BATCH_SIZE", default_value_t = bm25_core::config::DEFAULT_BATCH_SIZE)]
    batch_size: usize,
    /// Store read timeout in seconds
    #[arg(long, global = true, env = "BM25_STORE_TIMEOUT_SECS", default_value_t = 30)]
    store_timeout_secs: u64,
}

impl EngineArgs {
    fn config(&self) -> EngineConfig {
        EngineConfig {
            store_path: self.store.clone(),
            cache_path: self.cache.clone(),
            k1: self.k1.unwrap_or(DEFAULT_K1),
            b: self.b.unwrap_or(DEFAULT_B),
            batch_size: self.batch_size,
            store_timeout: Duration::from_secs(self.store_timeout_secs),
            ..EngineConfig::default()
        }
    }

    /// Parameters the caller asked for explicitly; `None` accepts whatever
    /// the cache was built with.
    fn requested_params(&self, config: &EngineConfig) -> Result<Option<Bm25Params>> {
        if self.k1.is_none() && self.b.is_none() {
            return Ok(None);
        }
        Ok(Some(config.params()?))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Load JSON/JSONL records into the document store
    Import {
        /// Input path (file or directory)
        #[arg(long)]
        input: PathBuf,
        /// Tokenize fields starting with these prefixes when a record has no tokens
        #[arg(long = "text-field", value_delimiter = ',')]
        text_fields: Vec<String>,
    },
    /// Build the index from the store and write the cache
    BuildIndex,
    /// Rank documents for a free-text query
    Query {
        text: String,
        #[arg(long, default_value_t = bm25_core::config::DEFAULT_TOP_K)]
        k: usize,
    },
    /// Score the index against relevance judgments
    Evaluate {
        judgments: PathBuf,
        #[arg(long, default_value_t = bm25_core::config::DEFAULT_TOP_K)]
        k: usize,
        /// Print the full report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Document length statistics for the cached index
    Stats,
}

fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        // Only the top-level message is user facing; causes may hold paths.
        tracing::debug!(error = ?err, "command failed");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = cli.engine.config();
    config.validate()?;
    let requested = cli.engine.requested_params(&config)?;

    match cli.command {
        Commands::Import { input, text_fields } => {
            let store = open_store(&config, Stage::Import)?;
            let summary = import_path(&store, &input, &ImportOptions { text_fields })?;
            store.close()?;
            println!(
                "imported {} records from {} files ({} tokenized, {} skipped)",
                summary.records, summary.files, summary.tokenized, summary.skipped
            );
        }
        Commands::BuildIndex => build_index(&config)?,
        Commands::Query { text, k } => {
            let index = load_index(&config, requested)?;
            for (rank, hit) in index.engine().query(&text, k).iter().enumerate() {
                println!("{:>3}. {}\t{:.4}", rank + 1, hit.doc_id, hit.score);
            }
        }
        Commands::Evaluate { judgments, k, json } => {
            let judgments = Judgments::from_json_file(&judgments)?;
            let index = load_index(&config, requested)?;
            let stop = Arc::new(AtomicBool::new(false));
            stop_on_ctrl_c(Arc::clone(&stop));
            let report = EvaluationHarness::new(index.engine(), k).evaluate_until(&judgments, &stop);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Commands::Stats => {
            let index = load_index(&config, requested)?;
            let stats = index.length_stats();
            let params = index.index().params();
            println!("built at:     {}", index.built_at().unwrap_or("unknown"));
            println!("k1 / b:       {} / {}", params.k1, params.b);
            println!("total docs:   {}", stats.documents);
            println!("terms:        {}", index.index().num_terms());
            println!("average:      {:.2} tokens", stats.mean);
            println!("median:       {:.2} tokens", stats.median);
            println!("min length:   {} tokens", stats.min);
            println!("max length:   {} tokens", stats.max);
            println!("95th pctile:  {:.2} tokens", stats.p95);
        }
    }
    Ok(())
}

fn open_store(config: &EngineConfig, stage: Stage) -> Result<SledStore> {
    SledStore::open(&config.store_path, config.store_timeout)
        .map_err(|e| SearchError::StoreUnavailable(stage, e).into())
}

/// Load the cached index, building it from the store first if there is none.
fn load_index(config: &EngineConfig, requested: Option<Bm25Params>) -> Result<SearchIndex> {
    let (index, origin) = load_or_build(&config.cache_path, requested, config.batch_size, || {
        SledStore::open(&config.store_path, config.store_timeout)
    })?;
    if origin == Origin::Built {
        tracing::info!(num_docs = index.index().num_docs(), "index built from store and cached");
    }
    Ok(index)
}

fn build_index(config: &EngineConfig) -> Result<()> {
    let store = open_store(config, Stage::Build)?;
    let (built, report) = rebuild(&store, config.params()?, config.batch_size, &config.cache_path)?;
    store.close()?;
    println!(
        "indexed {} documents ({} terms, {} malformed skipped)",
        built.index().num_docs(),
        built.index().num_terms(),
        report.skipped_malformed
    );
    tracing::debug!(path = %config.cache_path.display(), "cache written");
    Ok(())
}

/// Flip `stop` on Ctrl+C so a long evaluation ends after the current query.
fn stop_on_ctrl_c(stop: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::warn!(error = %e, "cannot install Ctrl+C handler");
                return;
            }
        };
        rt.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received; stopping after the current query");
                stop.store(true, Ordering::Relaxed);
            }
        });
    });
}

fn print_report(report: &EvaluationReport) {
    let k = report.k;
    for outcome in &report.outcomes {
        match outcome {
            QueryOutcome::Scored(m) => {
                println!("\nQuery: {}", m.query);
                println!("Retrieved IDs: {:?}", m.retrieved);
                println!("Relevance vector: {:?}", m.relevance);
                println!("Precision@{k}: {:.4}", m.precision);
                println!("Recall@{k}: {:.4}", m.recall);
                println!("NDCG@{k}: {:.4}", m.ndcg);
            }
            QueryOutcome::Failed { query, error } => {
                println!("\nQuery: {query}");
                println!("Failed: {error}");
            }
        }
    }
    let agg = &report.aggregate;
    println!();
    println!("Queries evaluated: {} ({} failed)", agg.queries, agg.failed);
    println!("Average NDCG@{k}: {:.4}", agg.mean_ndcg);
    println!("Average Precision@{k}: {:.4}", agg.mean_precision);
    println!("Average Recall@{k}: {:.4}", agg.mean_recall);
    println!("MRR: {:.4}", agg.mean_reciprocal_rank);
    println!("MAP: {:.4}", agg.mean_average_precision);
    if report.interrupted {
        println!("(interrupted before all queries ran)");
    }
}
