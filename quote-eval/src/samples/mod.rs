//! Evaluation samples and their per-sample outcomes

pub mod loader;

pub use loader::{load_documents_from_file, load_documents_from_str, LoadError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::ScoreRecord;
use crate::store::{Document, UpdateOutcome};

/// One (ground truth, system response) pair to score, built per run from a
/// stored document and never persisted as such
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: String,
    pub ground_truth: String,
    pub system_response: String,
}

impl Sample {
    pub fn new(
        id: impl Into<String>,
        ground_truth: impl Into<String>,
        system_response: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            ground_truth: ground_truth.into(),
            system_response: system_response.into(),
        }
    }

    /// Sample for `model` if the document carries a non-empty inference for it
    pub fn from_document(document: &Document, model: &str) -> Option<Self> {
        if document.id.is_empty() || document.ground_truth_quotes.is_empty() {
            return None;
        }
        let response = document.inference(model)?;
        Some(Self::new(
            &document.id,
            &document.ground_truth_quotes,
            response,
        ))
    }
}

/// Status of a sample evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleStatus {
    Scored,
    Error,
}

/// Result of evaluating one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleOutcome {
    pub id: String,
    pub model: String,
    pub status: SampleStatus,
    pub record: Option<ScoreRecord>,
    pub error_message: Option<String>,
    /// Store response to the score write, `None` when nothing was written
    pub persistence: Option<UpdateOutcome>,
    pub timestamp: DateTime<Utc>,
}

impl SampleOutcome {
    /// Create a scored outcome
    pub fn scored(id: String, model: String, record: ScoreRecord) -> Self {
        Self {
            id,
            model,
            status: SampleStatus::Scored,
            record: Some(record),
            error_message: None,
            persistence: None,
            timestamp: Utc::now(),
        }
    }

    /// Create an errored outcome
    pub fn failure(id: String, model: String, error: String) -> Self {
        Self {
            id,
            model,
            status: SampleStatus::Error,
            record: None,
            error_message: Some(error),
            persistence: None,
            timestamp: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == SampleStatus::Error
    }

    /// Scored, but the write matched no document
    pub fn is_mismatched(&self) -> bool {
        self.persistence.is_some_and(|p| !p.matched)
    }

    /// Scored, but the score write itself failed
    pub fn is_persist_failed(&self) -> bool {
        !self.is_error() && self.persistence.is_none() && self.error_message.is_some()
    }
}

/// Human-assigned recall/precision for one document and model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualScore {
    #[serde(alias = "uuid")]
    pub id: String,
    pub model: String,
    #[serde(default)]
    pub recall: f64,
    #[serde(default)]
    pub precision: f64,
}

impl ManualScore {
    pub fn new(
        id: impl Into<String>,
        model: impl Into<String>,
        recall: f64,
        precision: f64,
    ) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            recall,
            precision,
        }
    }
}
