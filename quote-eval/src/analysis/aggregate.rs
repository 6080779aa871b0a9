//! Per-model summary statistics over persisted score records

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::metrics::{round4, ScoreRecord};
use crate::store::{Document, DocumentFilter, DocumentStore, StoreResult};

/// Mean scores for one model
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregateStats {
    pub avg_recall: f64,
    pub avg_precision: f64,
    pub avg_f1: f64,
    pub avg_bm25: f64,
    pub avg_format_score: f64,
    pub count: usize,
}

impl AggregateStats {
    /// Average a set of records. Each field is floored at zero before
    /// averaging and the means are rounded to four decimals.
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a ScoreRecord>,
    {
        let mut sums = [0.0f64; 5];
        let mut count = 0usize;

        for record in records {
            let fields = [
                record.recall,
                record.precision,
                record.f1,
                record.bm25,
                record.format_score,
            ];
            for (sum, value) in sums.iter_mut().zip(fields) {
                *sum += value.max(0.0);
            }
            count += 1;
        }

        if count == 0 {
            return Self::default();
        }

        let mean = |sum: f64| round4(sum / count as f64);
        Self {
            avg_recall: mean(sums[0]),
            avg_precision: mean(sums[1]),
            avg_f1: mean(sums[2]),
            avg_bm25: mean(sums[3]),
            avg_format_score: mean(sums[4]),
            count,
        }
    }
}

/// Group the score records of `documents` by model and average them.
///
/// With `model` set, only that model's records are considered.
pub fn aggregate_documents(
    documents: &[Document],
    model: Option<&str>,
) -> BTreeMap<String, AggregateStats> {
    let mut grouped: BTreeMap<&str, Vec<&ScoreRecord>> = BTreeMap::new();

    for document in documents {
        for (model_name, record) in &document.scores {
            if model.is_some_and(|m| m != model_name.as_str()) {
                continue;
            }
            grouped.entry(model_name.as_str()).or_default().push(record);
        }
    }

    grouped
        .into_iter()
        .map(|(name, records)| (name.to_string(), AggregateStats::from_records(records)))
        .collect()
}

/// Read-side projection over every scored document in `store`
pub fn get_aggregate(
    store: &dyn DocumentStore,
    model: Option<&str>,
) -> StoreResult<BTreeMap<String, AggregateStats>> {
    let documents = store.find(&DocumentFilter::scored())?;
    tracing::debug!(documents = documents.len(), "aggregating scored documents");
    Ok(aggregate_documents(&documents, model))
}
