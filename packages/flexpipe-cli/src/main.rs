//! Command-line front end for the flexpipe enrichment pipeline.
//!
//! Wires the reference stage implementations to a filesystem store and
//! runs executions end to end. Secrets come from the environment here, at
//! the edge, and are passed into the library as constructor parameters.

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flexpipe::config::{PipelineConfig, StageSpec};
use flexpipe::consolidate::{Consolidator, SUMMARY_JSON};
use flexpipe::controller::PipelineController;
use flexpipe::security::ModelCredentials;
use flexpipe::stages::{
    ClassifyStage, HttpScraper, HttpVectorIndex, LinkDiscovery, OpenAiEmbedder, OpenAiModel,
    CLASSIFICATION_WORKERS,
};
use flexpipe::stores::FsStore;
use flexpipe::traits::store::DurableStore;
use flexpipe::types::{Execution, StageName};

const DEFAULT_SYSTEM_PROMPT: &str = "\
You judge whether a consumer product qualifies for reimbursement from a \
tax-advantaged health account. Consider the product's category, stated \
medical claims, and intended use. Respond with a JSON object containing \
\"eligibilityStatus\" (one of: eligible, not_eligible, \
prescription_required, unclear), \"explanation\", and \
\"additionalConsiderations\".";

#[derive(Parser)]
#[command(name = "flexpipe", about = "Product enrichment pipeline", version)]
struct Cli {
    /// Directory holding checkpoint records and result artifacts
    #[arg(long, default_value = "./pipeline-data", global = true)]
    store_root: PathBuf,

    /// Environment tag carried into stage contexts
    #[arg(long, default_value = "dev", global = true)]
    environment: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover products on a target site and run them through all stages
    Run {
        /// Seed page to discover product links on
        target: String,

        /// Resume an existing execution instead of starting a new one
        #[arg(long)]
        execution_id: Option<String>,

        /// Cap on items entering the pipeline
        #[arg(long)]
        max_items: Option<usize>,

        /// Bound on each stage's input queue
        #[arg(long, default_value_t = 256)]
        queue_depth: usize,

        /// Vector index namespace to upsert into
        #[arg(long, default_value = "products")]
        namespace: String,

        /// Chat model used for eligibility classification
        #[arg(long, default_value = "gpt-4o-mini")]
        model: String,

        /// Embedding model used for indexing
        #[arg(long, default_value = "text-embedding-3-small")]
        embedding_model: String,

        /// Classification calls per second across all workers
        #[arg(long, default_value_t = 10)]
        rate_limit: u32,

        /// Worker count for the extraction stage
        #[arg(long, default_value_t = flexpipe::stages::EXTRACTION_WORKERS)]
        extract_workers: usize,

        /// Worker count for the categorization stage
        #[arg(long, default_value_t = flexpipe::stages::CATEGORIZATION_WORKERS)]
        categorize_workers: usize,

        /// Worker count for the classification stage
        #[arg(long, default_value_t = flexpipe::stages::CLASSIFICATION_WORKERS)]
        classify_workers: usize,

        /// Worker count for the indexing stage
        #[arg(long, default_value_t = flexpipe::stages::INDEXING_WORKERS)]
        index_workers: usize,

        /// File holding the classification system prompt
        #[arg(long)]
        prompt_file: Option<PathBuf>,
    },

    /// Print an execution's summary, live-aggregated if not yet consolidated
    Status {
        execution_id: String,
    },

    /// Rebuild the result artifacts for an execution
    Consolidate {
        execution_id: String,

        /// Records per page when listing checkpoints
        #[arg(long, default_value_t = 500)]
        page_size: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flexpipe=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let store = Arc::new(FsStore::new(&cli.store_root));

    match cli.command {
        Commands::Run {
            target,
            execution_id,
            max_items,
            queue_depth,
            namespace,
            model,
            embedding_model,
            rate_limit,
            extract_workers,
            categorize_workers,
            classify_workers,
            index_workers,
            prompt_file,
        } => {
            run(
                store,
                &cli.environment,
                RunArgs {
                    target,
                    execution_id,
                    max_items,
                    queue_depth,
                    namespace,
                    model,
                    embedding_model,
                    rate_limit,
                    workers: [
                        extract_workers,
                        categorize_workers,
                        classify_workers,
                        index_workers,
                    ],
                    prompt_file,
                },
            )
            .await
        }
        Commands::Status { execution_id } => status(store, &execution_id).await,
        Commands::Consolidate {
            execution_id,
            page_size,
        } => consolidate(store, &execution_id, page_size).await,
    }
}

struct RunArgs {
    target: String,
    execution_id: Option<String>,
    max_items: Option<usize>,
    queue_depth: usize,
    namespace: String,
    model: String,
    embedding_model: String,
    rate_limit: u32,
    workers: [usize; 4],
    prompt_file: Option<PathBuf>,
}

async fn run(store: Arc<FsStore>, environment: &str, args: RunArgs) -> Result<()> {
    let openai_key =
        std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set to classify")?;
    let index_url = std::env::var("VECTOR_INDEX_URL")
        .context("VECTOR_INDEX_URL must be set to upload vectors")?;
    let index_key = std::env::var("VECTOR_INDEX_API_KEY")
        .context("VECTOR_INDEX_API_KEY must be set to upload vectors")?;

    let system_prompt = match &args.prompt_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading prompt file {}", path.display()))?,
        None => DEFAULT_SYSTEM_PROMPT.to_string(),
    };

    let model: Arc<OpenAiModel> = Arc::new(OpenAiModel::new(
        ModelCredentials::new(openai_key.clone(), &args.model),
        system_prompt,
    ));
    let embedder = OpenAiEmbedder::new(ModelCredentials::new(openai_key, &args.embedding_model));
    let index = HttpVectorIndex::new(index_url, index_key);

    let mut stages = flexpipe::stages::standard_stages(
        Arc::new(HttpScraper::new()),
        model.clone(),
        Arc::new(embedder),
        Arc::new(index),
        &args.namespace,
    );
    if let Some(rate) = NonZeroU32::new(args.rate_limit) {
        // Rebuild the classification slot with a shared rate limiter.
        let classify = ClassifyStage::new(model).with_rate_limit(rate);
        stages[2] = StageSpec::new(
            StageName::Classification,
            CLASSIFICATION_WORKERS,
            Arc::new(classify),
        );
    }
    for (spec, workers) in stages.iter_mut().zip(args.workers) {
        spec.workers = workers.max(1);
    }

    let config = PipelineConfig::new(environment).with_queue_depth(args.queue_depth);
    let controller =
        PipelineController::new(config, store, Arc::new(LinkDiscovery::new()), stages);

    let mut execution = Execution::new(&args.target, environment);
    if let Some(id) = args.execution_id {
        execution = execution.with_id(id);
    }
    if let Some(max) = args.max_items {
        execution = execution.with_max_items(max);
    }

    println!("execution: {}", execution.id);
    let report = controller.run(&execution).await?;

    println!(
        "discovered {} items; {} completed in {:.1}s",
        report.discovered,
        report.completed_items(),
        report.elapsed_secs
    );
    for outcome in &report.stage_outcomes {
        println!(
            "  {:<16} workers={:<3} ok={:<5} failed={:<5} skipped={:<5} rate={:.1}%",
            outcome.stage.to_string(),
            outcome.workers,
            outcome.tally.succeeded,
            outcome.tally.failed,
            outcome.tally.skipped,
            outcome.success_rate() * 100.0
        );
    }
    println!("artifacts: {}", report.artifacts.join(", "));
    Ok(())
}

async fn status(store: Arc<FsStore>, execution_id: &str) -> Result<()> {
    let summary = store
        .get_artifact(execution_id, SUMMARY_JSON)
        .await
        .context("reading summary artifact")?;
    match summary {
        Some(bytes) => {
            let summary: serde_json::Value = serde_json::from_slice(&bytes)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        None => {
            // Not consolidated yet (or still running): aggregate the
            // checkpoints directly, without writing artifacts.
            let summary = Consolidator::new(store, 500)
                .snapshot(execution_id)
                .await
                .context("aggregating checkpoints")?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}

async fn consolidate(store: Arc<FsStore>, execution_id: &str, page_size: usize) -> Result<()> {
    let consolidation = Consolidator::new(store, page_size).run(execution_id).await?;
    println!(
        "{} items ({} completed, {} eligible); wrote {}",
        consolidation.summary.total_items,
        consolidation.summary.completed_items,
        consolidation.summary.eligible_items,
        consolidation.artifacts.join(", ")
    );
    Ok(())
}
