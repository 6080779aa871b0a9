//! SQLite-backed document store
//!
//! Documents live in a single table with the inference and score maps held as
//! JSON objects. The connection is owned by the store and closed on drop.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use indexmap::IndexMap;
use rusqlite::{params, Connection, OptionalExtension};

use super::{Document, DocumentFilter, DocumentStore, StoreError, StoreResult, UpdateOutcome};
use crate::analysis::ScoreRecord;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
  id TEXT PRIMARY KEY,
  ground_truth_quotes TEXT NOT NULL DEFAULT '',
  inferences TEXT NOT NULL DEFAULT '{}',
  scores TEXT NOT NULL DEFAULT '{}'
);
";

/// Document store over one SQLite connection
pub struct SqliteStore {
    connection: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        let connection = Connection::open(path).map_err(|e| {
            StoreError::Connection(format!("failed to open {}: {}", path.display(), e))
        })?;
        connection
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(|e| StoreError::Connection(format!("failed to set journal_mode: {}", e)))?;
        connection
            .pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| StoreError::Connection(format!("failed to set synchronous: {}", e)))?;

        tracing::debug!(path = %path.display(), "opened sqlite document store");
        Self::with_connection(connection)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> StoreResult<Self> {
        let connection = Connection::open_in_memory()
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::with_connection(connection)
    }

    fn with_connection(connection: Connection) -> StoreResult<Self> {
        connection
            .execute_batch(SCHEMA)
            .map_err(|e| StoreError::Connection(format!("failed to create schema: {}", e)))?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|_| StoreError::Connection("sqlite connection lock poisoned".to_string()))
    }
}

struct DocumentRow {
    id: String,
    ground_truth_quotes: String,
    inferences: String,
    scores: String,
}

impl DocumentRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            ground_truth_quotes: row.get(1)?,
            inferences: row.get(2)?,
            scores: row.get(3)?,
        })
    }

    fn into_document(self) -> StoreResult<Document> {
        Ok(Document {
            id: self.id,
            ground_truth_quotes: self.ground_truth_quotes,
            inferences: serde_json::from_str(&self.inferences)?,
            scores: serde_json::from_str(&self.scores)?,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, ground_truth_quotes, inferences, scores FROM documents";

impl DocumentStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn find(&self, filter: &DocumentFilter) -> StoreResult<Vec<Document>> {
        let connection = self.lock()?;

        let rows: Vec<DocumentRow> = match &filter.id {
            Some(id) => {
                let mut stmt =
                    connection.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1 ORDER BY rowid"))?;
                let rows = stmt.query_map(params![id], DocumentRow::from_row)?;
                rows.collect::<rusqlite::Result<_>>()?
            }
            None => {
                let mut stmt = connection.prepare(&format!("{SELECT_COLUMNS} ORDER BY rowid"))?;
                let rows = stmt.query_map([], DocumentRow::from_row)?;
                rows.collect::<rusqlite::Result<_>>()?
            }
        };
        drop(connection);

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            let document = row.into_document()?;
            if filter.matches(&document) {
                documents.push(document);
            }
        }
        Ok(documents)
    }

    fn get(&self, id: &str) -> StoreResult<Option<Document>> {
        let connection = self.lock()?;
        let row = connection
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                DocumentRow::from_row,
            )
            .optional()?;
        row.map(DocumentRow::into_document).transpose()
    }

    fn insert(&self, document: Document) -> StoreResult<()> {
        let inferences = serde_json::to_string(&document.inferences)?;
        let scores = serde_json::to_string(&document.scores)?;
        let connection = self.lock()?;
        connection.execute(
            "INSERT INTO documents (id, ground_truth_quotes, inferences, scores)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
               ground_truth_quotes = excluded.ground_truth_quotes,
               inferences = excluded.inferences,
               scores = excluded.scores",
            params![document.id, document.ground_truth_quotes, inferences, scores],
        )?;
        Ok(())
    }

    fn set_score(&self, id: &str, model: &str, record: &ScoreRecord) -> StoreResult<UpdateOutcome> {
        let mut connection = self.lock()?;
        let tx = connection.transaction()?;

        let current: Option<String> = tx
            .query_row(
                "SELECT scores FROM documents WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Ok(UpdateOutcome::default());
        };

        let mut scores: IndexMap<String, ScoreRecord> = serde_json::from_str(&current)?;
        let previous = scores.insert(model.to_string(), *record);
        if previous.as_ref() == Some(record) {
            return Ok(UpdateOutcome {
                matched: true,
                modified: false,
            });
        }

        tx.execute(
            "UPDATE documents SET scores = ?2 WHERE id = ?1",
            params![id, serde_json::to_string(&scores)?],
        )?;
        tx.commit()?;

        Ok(UpdateOutcome {
            matched: true,
            modified: true,
        })
    }

    fn count(&self) -> StoreResult<usize> {
        let connection = self.lock()?;
        let count: i64 =
            connection.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
