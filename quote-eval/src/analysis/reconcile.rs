//! Repair of contradictory judge verdicts
//!
//! A judge reporting `recall > 0` with `precision == 0` contradicts itself when
//! both quote sets are non-empty: a recalled ground-truth quote must have been
//! matched by some system quote. Only that exact pattern is repaired.

use super::metrics::round4;
use crate::quotes::count_quotes;

/// Recall/precision pair as reported by the semantic judge
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct JudgeVerdict {
    pub recall: f64,
    pub precision: f64,
}

impl JudgeVerdict {
    pub fn new(recall: f64, precision: f64) -> Self {
        Self { recall, precision }
    }
}

/// Lower-bound precision for `recall` given the parsed quote counts
pub fn repaired_precision(recall: f64, n_gt: usize, n_sys: usize) -> f64 {
    let n_gt = n_gt as f64;
    let n_sys = n_sys as f64;
    round4((1.0 / n_sys).max(recall * n_gt / n_sys))
}

/// Apply the repair against pre-computed quote counts
pub fn reconcile_counts(verdict: JudgeVerdict, n_gt: usize, n_sys: usize) -> JudgeVerdict {
    if verdict.recall > 0.0 && verdict.precision == 0.0 && n_gt > 0 && n_sys > 0 {
        return JudgeVerdict {
            recall: verdict.recall,
            precision: repaired_precision(verdict.recall, n_gt, n_sys),
        };
    }
    verdict
}

/// Apply the repair, parsing both texts independently of the judge
pub fn reconcile(verdict: JudgeVerdict, ground_truth: &str, system_response: &str) -> JudgeVerdict {
    reconcile_counts(
        verdict,
        count_quotes(ground_truth),
        count_quotes(system_response),
    )
}
