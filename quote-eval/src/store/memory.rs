//! In-memory document store

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;

use super::{Document, DocumentFilter, DocumentStore, StoreError, StoreResult, UpdateOutcome};
use crate::analysis::ScoreRecord;

/// Insertion-ordered store backed by a map
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<IndexMap<String, Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.documents.write() {
            for document in documents {
                map.insert(document.id.clone(), document);
            }
        }
        store
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, IndexMap<String, Document>>> {
        self.documents
            .read()
            .map_err(|_| StoreError::Connection("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, IndexMap<String, Document>>> {
        self.documents
            .write()
            .map_err(|_| StoreError::Connection("memory store lock poisoned".to_string()))
    }
}

impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn find(&self, filter: &DocumentFilter) -> StoreResult<Vec<Document>> {
        Ok(self
            .read()?
            .values()
            .filter(|doc| filter.matches(doc))
            .cloned()
            .collect())
    }

    fn get(&self, id: &str) -> StoreResult<Option<Document>> {
        Ok(self.read()?.get(id).cloned())
    }

    fn insert(&self, document: Document) -> StoreResult<()> {
        self.write()?.insert(document.id.clone(), document);
        Ok(())
    }

    fn set_score(&self, id: &str, model: &str, record: &ScoreRecord) -> StoreResult<UpdateOutcome> {
        let mut documents = self.write()?;
        let Some(document) = documents.get_mut(id) else {
            return Ok(UpdateOutcome::default());
        };
        let previous = document.scores.insert(model.to_string(), *record);
        Ok(UpdateOutcome {
            matched: true,
            modified: previous.as_ref() != Some(record),
        })
    }

    fn count(&self) -> StoreResult<usize> {
        Ok(self.read()?.len())
    }
}
