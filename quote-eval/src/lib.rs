//! Quote span evaluation
//!
//! Scores the quotes a model extracted from a context against ground-truth
//! quotes. Every (document, model) pair gets a composite [`ScoreRecord`]:
//!
//! - semantic recall and precision from an LLM judge, repaired when the judge
//!   contradicts itself, combined into F1;
//! - a BM25 lexical similarity normalized against the ground truth's
//!   self-similarity;
//! - a binary format score telling whether the response is nothing but
//!   `##begin_quote## ... ##end_quote##` blocks.
//!
//! Scores are persisted per model in a document store and averaged on demand.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use quote_eval::{
//!     config::Config,
//!     judge::SemanticJudge,
//!     providers::create_judge_provider,
//!     runner::{Evaluator, RunOptions},
//!     store::SqliteStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_or_default();
//!     let store = Arc::new(SqliteStore::open(&config.store.path)?);
//!     let provider = create_judge_provider(&config.judge)?;
//!     let judge = Arc::new(SemanticJudge::new(provider, config.judge.judge_config())?);
//!
//!     let evaluator = Evaluator::new(store, judge);
//!     let summary = evaluator
//!         .run_evaluation(&RunOptions::default().with_max_workers(4))
//!         .await?;
//!     println!("evaluated {:?}", summary.models_evaluated);
//!
//!     for (model, stats) in evaluator.get_aggregate(None).await? {
//!         println!("{model}: F1 {:.4}", stats.avg_f1);
//!     }
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod config;
pub mod judge;
pub mod providers;
pub mod quotes;
pub mod reporting;
pub mod runner;
pub mod samples;
pub mod store;

pub use analysis::ScoreRecord;
pub use config::Config;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::analysis::{
        bm25_score, f1_score, get_aggregate, reconcile, AggregateStats, JudgeVerdict, ScoreRecord,
    };
    pub use crate::config::Config;
    pub use crate::judge::{JudgeConfig, JudgeError, QuoteJudge, ReasoningEffort, SemanticJudge};
    pub use crate::providers::{
        create_judge_provider, CompletionRequest, CompletionResponse, LLMProvider, Message,
        ProviderError, ProviderResult,
    };
    pub use crate::quotes::{format_score, parse_quotes};
    pub use crate::reporting::{print_aggregate_report, print_run_report, JsonSummary};
    pub use crate::runner::{
        EvalError, EvaluationSummary, Evaluator, ModelRunReport, ProgressCallback, RunOptions,
    };
    pub use crate::samples::{ManualScore, Sample, SampleOutcome, SampleStatus};
    pub use crate::store::{
        Document, DocumentFilter, DocumentStore, MemoryStore, SqliteStore, StoreError,
        UpdateOutcome,
    };
}
