//! Score records and the numeric helpers shared by every scorer

use serde::{Deserialize, Serialize};

/// Clamp a score into `[0, 1]`. NaN collapses to `0`.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// Round to four decimal places
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Harmonic mean of clamped precision and recall.
///
/// Symmetric in its arguments; `0` when both are `0`.
pub fn f1_score(precision: f64, recall: f64) -> f64 {
    let precision = clamp_unit(precision);
    let recall = clamp_unit(recall);
    if precision + recall == 0.0 {
        return 0.0;
    }
    2.0 * (precision * recall) / (precision + recall)
}

/// Composite score persisted under `scores.<model>` for one document
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub recall: f64,
    pub precision: f64,
    pub f1: f64,
    pub bm25: f64,
    pub format_score: f64,
}

impl ScoreRecord {
    /// Assemble a record from judged recall/precision and the lexical and
    /// structural scores. F1 is always derived here, never taken from input.
    pub fn new(recall: f64, precision: f64, bm25: f64, format_score: f64) -> Self {
        let recall = clamp_unit(recall);
        let precision = clamp_unit(precision);
        Self {
            recall,
            precision,
            f1: f1_score(precision, recall),
            bm25: clamp_unit(bm25),
            format_score: if format_score >= 1.0 { 1.0 } else { 0.0 },
        }
    }

    /// Same as [`ScoreRecord::new`] with recall, precision and F1 rounded to
    /// four decimals, the shape manual overrides are stored in.
    pub fn rounded(recall: f64, precision: f64, bm25: f64, format_score: f64) -> Self {
        let record = Self::new(round4(recall), round4(precision), bm25, format_score);
        Self {
            f1: round4(record.f1),
            ..record
        }
    }
}
