//! Scoring of quote responses against ground truth

pub mod aggregate;
pub mod lexical;
pub mod metrics;
pub mod reconcile;

pub use aggregate::{aggregate_documents, get_aggregate, AggregateStats};
pub use lexical::{bm25_score, tokenize, Bm25Index, Bm25Params};
pub use metrics::{clamp_unit, f1_score, round4, ScoreRecord};
pub use reconcile::{reconcile, reconcile_counts, repaired_precision, JudgeVerdict};
