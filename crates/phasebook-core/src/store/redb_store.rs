//! # redb-backed Document Store
//!
//! A single-file document store using the redb embedded database.
//!
//! Provides:
//! - ACID transactions (every `put` is one committed write transaction)
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! Values are `postcard`-encoded [`PromptDocument`]s keyed by `"<tier>/<id>"`.

use super::DocumentStore;
use crate::{DocPath, DocTier, EngineError, PromptDocument};
use redb::{Database, DatabaseError, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;

/// Table for documents: "<tier>/<id>" -> postcard-encoded PromptDocument
const DOCUMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");

/// A disk-backed document store using redb.
pub struct RedbDocumentStore {
    db: Database,
}

impl std::fmt::Debug for RedbDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbDocumentStore").finish_non_exhaustive()
    }
}

fn io_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::Io(e.to_string())
}

impl RedbDocumentStore {
    /// Open or create a document database at the given path.
    ///
    /// redb holds an exclusive file lock for as long as the database is open,
    /// so a second opener (another `phasebook` process, even a read-only
    /// command) gets `LockHeld` until the first one exits.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let db = Database::create(path).map_err(|e| match e {
            DatabaseError::DatabaseAlreadyOpen => EngineError::LockHeld(format!(
                "{} is open in another process; retry when it finishes",
                path.display()
            )),
            other => io_err(other),
        })?;

        // Initialize the table if it doesn't exist
        {
            let write_txn = db.begin_write().map_err(io_err)?;
            let _ = write_txn.open_table(DOCUMENTS).map_err(io_err)?;
            write_txn.commit().map_err(io_err)?;
        }

        Ok(Self { db })
    }

    fn key(tier: DocTier, id: &str) -> String {
        DocPath::new(tier, id).to_string()
    }
}

impl DocumentStore for RedbDocumentStore {
    fn get(&self, tier: DocTier, id: &str) -> Result<Option<PromptDocument>, EngineError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(DOCUMENTS).map_err(io_err)?;
        let key = Self::key(tier, id);
        let Some(data) = table.get(key.as_str()).map_err(io_err)? else {
            return Ok(None);
        };
        let doc = postcard::from_bytes::<PromptDocument>(data.value()).map_err(|e| {
            EngineError::Serialization(format!("Failed to decode document {}: {}", key, e))
        })?;
        Ok(Some(doc))
    }

    fn put(&mut self, doc: &PromptDocument) -> Result<(), EngineError> {
        crate::types::validate_document_id(&doc.id)?;
        let bytes = postcard::to_allocvec(doc)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        let key = Self::key(doc.tier, &doc.id);

        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut table = write_txn.open_table(DOCUMENTS).map_err(io_err)?;
            table
                .insert(key.as_str(), bytes.as_slice())
                .map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)
    }

    fn restore(
        &mut self,
        tier: DocTier,
        id: &str,
        prior: Option<&PromptDocument>,
    ) -> Result<(), EngineError> {
        match prior {
            Some(doc) => self.put(doc),
            None => {
                let key = Self::key(tier, id);
                let write_txn = self.db.begin_write().map_err(io_err)?;
                {
                    let mut table = write_txn.open_table(DOCUMENTS).map_err(io_err)?;
                    let _ = table.remove(key.as_str()).map_err(io_err)?;
                }
                write_txn.commit().map_err(io_err)
            }
        }
    }

    fn ids(&self, tier: DocTier) -> Result<Vec<String>, EngineError> {
        let prefix = format!("{}/", tier);
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(DOCUMENTS).map_err(io_err)?;

        let mut ids = Vec::new();
        for entry in table.range(prefix.as_str()..).map_err(io_err)? {
            let (key, _) = entry.map_err(io_err)?;
            match key.value().strip_prefix(prefix.as_str()) {
                Some(id) => ids.push(id.to_string()),
                None => break,
            }
        }
        Ok(ids)
    }
}
