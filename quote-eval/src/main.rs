//! Quote evaluation CLI

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use quote_eval::{
    analysis::get_aggregate,
    config::Config,
    judge::SemanticJudge,
    providers::create_judge_provider,
    reporting::{print_aggregate_report, print_run_report, JsonSummary},
    runner::{apply_manual_score, apply_manual_scores, ConsoleProgress, Evaluator, RunOptions},
    samples::{load_documents_from_file, ManualScore},
    store::{DocumentStore, SqliteStore},
};

#[derive(Parser)]
#[command(name = "quote-eval")]
#[command(about = "Score extracted quote spans against ground truth")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Document store path (overrides the configuration)
    #[arg(short, long, global = true)]
    store: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Score stored model responses
    Evaluate {
        /// Comma-separated model list (default: every model in the store)
        #[arg(short, long)]
        models: Option<String>,

        /// Evaluate a single document
        #[arg(long)]
        id: Option<String>,

        /// Recompute existing scores
        #[arg(long)]
        force: bool,

        /// Number of parallel judge calls
        #[arg(short, long)]
        workers: Option<usize>,

        /// Echo judge prompts
        #[arg(long)]
        prompts: bool,
    },

    /// Show per-model means over stored scores
    Aggregate {
        /// Restrict to one model
        #[arg(short, long)]
        model: Option<String>,

        /// Also write a JSON summary to this file
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Store human-assigned recall and precision
    ManualScore {
        /// JSON array of {id|uuid, model, recall, precision}
        #[arg(short, long, conflicts_with_all = ["id", "model"])]
        file: Option<PathBuf>,

        #[arg(long, requires = "model")]
        id: Option<String>,

        #[arg(long, requires = "id")]
        model: Option<String>,

        #[arg(long, default_value = "0")]
        recall: f64,

        #[arg(long, default_value = "0")]
        precision: f64,
    },

    /// Import documents from a JSON Lines or JSON array file
    Import {
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Generate sample configuration
    InitConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config/quote-eval.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("quote_eval=debug,info")
    } else {
        EnvFilter::new("quote_eval=info,warn")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load_or_default(),
    };
    let store_path = cli
        .store
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.store.path));

    match cli.command {
        Commands::Evaluate {
            models,
            id,
            force,
            workers,
            prompts,
        } => {
            let options = RunOptions {
                models: models
                    .map(|m| split_list(&m))
                    .or_else(|| config.models().map(<[String]>::to_vec)),
                document_id: id,
                force: force || config.evaluation.force,
                max_workers: workers.unwrap_or(config.evaluation.max_workers),
                verbose: prompts.then_some(true),
            };
            run_evaluation(&config, store_path, options, cli.verbose).await?;
        }

        Commands::Aggregate { model, json } => {
            let store = SqliteStore::open(&store_path)?;
            let aggregates = get_aggregate(&store, model.as_deref())?;
            print_aggregate_report(&aggregates);

            if let Some(path) = json {
                let run_id = Utc::now().format("%Y%m%d-%H%M%S").to_string();
                JsonSummary::from_aggregates(run_id, &aggregates).write_to_file(&path)?;
                println!("Summary written to {}", path.display());
            }
        }

        Commands::ManualScore {
            file,
            id,
            model,
            recall,
            precision,
        } => {
            let store = SqliteStore::open(&store_path)?;
            let updated = match (file, id, model) {
                (Some(path), _, _) => {
                    let scores: Vec<ManualScore> =
                        serde_json::from_str(&std::fs::read_to_string(&path)?)?;
                    apply_manual_scores(&store, &scores)?
                }
                (None, Some(id), Some(model)) => {
                    usize::from(apply_manual_score(&store, &id, &model, recall, precision)?)
                }
                _ => return Err("manual-score needs --file or --id with --model".into()),
            };
            println!("Updated {} documents with manual scores", updated);
        }

        Commands::Import { input } => {
            let documents = load_documents_from_file(&input)?;
            let store = SqliteStore::open(&store_path)?;
            let total = documents.len();
            for document in documents {
                store.insert(document)?;
            }
            println!(
                "Imported {} documents into {} ({} stored)",
                total,
                store_path.display(),
                store.count()?
            );
        }

        Commands::InitConfig { output } => {
            Config::default().save_toml(&output)?;
            println!("Configuration written to {}", output.display());
        }
    }

    Ok(())
}

async fn run_evaluation(
    config: &Config,
    store_path: PathBuf,
    options: RunOptions,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Quote Evaluation ===");
    println!("Store: {}", store_path.display());
    println!(
        "Judge: {} ({})",
        config.judge.model,
        config.judge.reasoning_effort
    );
    println!();

    // The store lives for this run only and is closed when the evaluator drops
    let store = Arc::new(SqliteStore::open(&store_path)?);
    let provider = create_judge_provider(&config.judge)?;
    let judge = Arc::new(SemanticJudge::new(provider, config.judge.judge_config())?);

    let mut evaluator = Evaluator::new(store, judge);
    if verbose {
        evaluator = evaluator.with_progress(Arc::new(ConsoleProgress));
    }

    let summary = evaluator.run_evaluation(&options).await?;
    print_run_report(&summary);
    Ok(())
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
