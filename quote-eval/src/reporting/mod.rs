//! Results reporting

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::analysis::AggregateStats;
use crate::runner::EvaluationSummary;

/// JSON summary export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonSummary {
    pub run_id: String,
    pub timestamp: String,
    pub total_samples: usize,
    pub model_rankings: Vec<ModelRanking>,
    pub aggregates: BTreeMap<String, AggregateStats>,
}

/// Model ranking in summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRanking {
    pub model: String,
    pub avg_f1: f64,
    pub avg_bm25: f64,
    pub count: usize,
}

/// Models ordered by mean F1, then mean BM25, then name
pub fn rank_models(aggregates: &BTreeMap<String, AggregateStats>) -> Vec<ModelRanking> {
    let mut rankings: Vec<ModelRanking> = aggregates
        .iter()
        .map(|(model, stats)| ModelRanking {
            model: model.clone(),
            avg_f1: stats.avg_f1,
            avg_bm25: stats.avg_bm25,
            count: stats.count,
        })
        .collect();

    rankings.sort_by(|a, b| {
        b.avg_f1
            .partial_cmp(&a.avg_f1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.avg_bm25
                    .partial_cmp(&a.avg_bm25)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.model.cmp(&b.model))
    });
    rankings
}

impl JsonSummary {
    /// Create from per-model aggregates
    pub fn from_aggregates(
        run_id: impl Into<String>,
        aggregates: &BTreeMap<String, AggregateStats>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            total_samples: aggregates.values().map(|s| s.count).sum(),
            model_rankings: rank_models(aggregates),
            aggregates: aggregates.clone(),
        }
    }

    /// Write to JSON file
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
    }
}

/// Print the per-model aggregate table, sorted by model name
pub fn print_aggregate_report(aggregates: &BTreeMap<String, AggregateStats>) {
    println!("\n=== Quote Evaluation Aggregates ===\n");

    if aggregates.is_empty() {
        println!("No scored documents.");
        return;
    }

    println!(
        "{:<32} {:>8} {:>8} {:>8} {:>8} {:>8} {:>6}",
        "Model", "Recall", "Prec", "F1", "BM25", "Format", "N"
    );
    println!("{:-<84}", "");
    for (model, stats) in aggregates {
        println!(
            "{:<32} {:>8.4} {:>8.4} {:>8.4} {:>8.4} {:>8.4} {:>6}",
            model,
            stats.avg_recall,
            stats.avg_precision,
            stats.avg_f1,
            stats.avg_bm25,
            stats.avg_format_score,
            stats.count
        );
    }

    println!("\nRanking by F1:");
    for (i, ranking) in rank_models(aggregates).iter().enumerate() {
        println!(
            "  {}. {} - F1: {:.4}, BM25: {:.4}",
            i + 1,
            ranking.model,
            ranking.avg_f1,
            ranking.avg_bm25
        );
    }

    println!("\n{:=<84}", "");
}

/// Print the outcome of a batch run
pub fn print_run_report(summary: &EvaluationSummary) {
    println!("\n=== Evaluation Run ===\n");
    println!("Documents considered: {}", summary.documents_considered);
    println!("Models evaluated: {}", summary.models_evaluated.join(", "));

    for report in &summary.reports {
        println!("\n{}:", report.model);
        println!(
            "  selected {}, scored {}, skipped {}, errored {}, persisted {}, mismatched {}, \
             write failed {}",
            report.selected,
            report.scored,
            report.skipped,
            report.errored,
            report.persisted,
            report.mismatched,
            report.persist_failed
        );
        if report.stats.count > 0 {
            println!(
                "  R={:.4} P={:.4} F1={:.4} BM25={:.4} FMT={:.4}",
                report.stats.avg_recall,
                report.stats.avg_precision,
                report.stats.avg_f1,
                report.stats.avg_bm25,
                report.stats.avg_format_score
            );
        }
        for outcome in report
            .outcomes
            .iter()
            .filter(|o| o.is_error() || o.is_persist_failed())
        {
            println!(
                "  error {}: {}",
                outcome.id,
                outcome.error_message.as_deref().unwrap_or("unknown error")
            );
        }
    }

    println!("\n{:=<50}", "");
}
