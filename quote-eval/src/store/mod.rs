//! Document store capability
//!
//! One document per ingested sample, holding the ground-truth quotes, the
//! responses of every competing model and the per-model score records. The
//! evaluator only ever writes `scores.<model>`.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::analysis::ScoreRecord;

/// A persisted sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(alias = "uuid")]
    pub id: String,
    #[serde(alias = "quotes", default)]
    pub ground_truth_quotes: String,
    /// Model name to response text
    #[serde(default)]
    pub inferences: IndexMap<String, String>,
    /// Model name to score record
    #[serde(default)]
    pub scores: IndexMap<String, ScoreRecord>,
}

impl Document {
    pub fn new(id: impl Into<String>, ground_truth_quotes: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ground_truth_quotes: ground_truth_quotes.into(),
            inferences: IndexMap::new(),
            scores: IndexMap::new(),
        }
    }

    pub fn with_inference(mut self, model: impl Into<String>, response: impl Into<String>) -> Self {
        self.inferences.insert(model.into(), response.into());
        self
    }

    pub fn with_score(mut self, model: impl Into<String>, record: ScoreRecord) -> Self {
        self.scores.insert(model.into(), record);
        self
    }

    /// Non-empty inference text for `model`
    pub fn inference(&self, model: &str) -> Option<&str> {
        self.inferences
            .get(model)
            .map(String::as_str)
            .filter(|text| !text.is_empty())
    }

    pub fn score(&self, model: &str) -> Option<&ScoreRecord> {
        self.scores.get(model)
    }
}

/// Predicates supported by [`DocumentStore::find`]. All set predicates must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentFilter {
    pub has_ground_truth: bool,
    pub has_inferences: bool,
    pub has_scores: bool,
    pub id: Option<String>,
}

impl DocumentFilter {
    /// Documents eligible for evaluation
    pub fn evaluable() -> Self {
        Self {
            has_ground_truth: true,
            has_inferences: true,
            ..Self::default()
        }
    }

    /// Documents holding at least one score record
    pub fn scored() -> Self {
        Self {
            has_scores: true,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn matches(&self, document: &Document) -> bool {
        if self.has_ground_truth && document.ground_truth_quotes.is_empty() {
            return false;
        }
        if self.has_inferences && document.inferences.is_empty() {
            return false;
        }
        if self.has_scores && document.scores.is_empty() {
            return false;
        }
        match &self.id {
            Some(id) => &document.id == id,
            None => true,
        }
    }
}

/// Result of a targeted single-field update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateOutcome {
    /// A document with the id existed
    pub matched: bool,
    /// The stored value changed
    pub modified: bool,
}

/// Document store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store connection failed: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Query(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence for documents. Implementations must make [`set_score`]
/// atomic per document.
///
/// [`set_score`]: DocumentStore::set_score
pub trait DocumentStore: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &str;

    /// All documents matching `filter`, in store order
    fn find(&self, filter: &DocumentFilter) -> StoreResult<Vec<Document>>;

    fn get(&self, id: &str) -> StoreResult<Option<Document>>;

    /// Insert or replace a document by id
    fn insert(&self, document: Document) -> StoreResult<()>;

    /// Set `scores.<model>` on the document with `id`. Does not create documents.
    fn set_score(&self, id: &str, model: &str, record: &ScoreRecord) -> StoreResult<UpdateOutcome>;

    fn count(&self) -> StoreResult<usize> {
        Ok(self.find(&DocumentFilter::default())?.len())
    }
}
