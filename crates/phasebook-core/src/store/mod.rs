//! # Document Store
//!
//! Addressable storage for prompt documents, keyed by `(tier, id)`.
//!
//! ## Backends
//!
//! - `MemoryDocumentStore`: `BTreeMap` in memory (fast, volatile)
//! - `FileDocumentStore`: `<root>/<tier>/<id>.md` plus `<id>.log.json`
//! - `RedbDocumentStore`: one redb table of postcard-encoded documents
//!
//! Documents are never deleted. `restore` exists only to undo a write made
//! by an operation that is itself being rolled back.

mod files;
mod memory;
mod redb_store;

pub use files::FileDocumentStore;
pub use memory::MemoryDocumentStore;
pub use redb_store::RedbDocumentStore;

use crate::{DocPath, DocTier, EngineError, PromptDocument};
use chrono::{DateTime, Utc};

// =============================================================================
// DOCUMENTSTORE TRAIT
// =============================================================================

/// The DocumentStore trait defines the document operations the engine needs.
///
/// All fallible operations return `Result<T, EngineError>` so in-memory and
/// persistent backends are used uniformly. A missing document is `Ok(None)`,
/// never an error.
pub trait DocumentStore {
    /// Fetch a document with its update log.
    fn get(&self, tier: DocTier, id: &str) -> Result<Option<PromptDocument>, EngineError>;

    /// Insert or replace a document.
    fn put(&mut self, doc: &PromptDocument) -> Result<(), EngineError>;

    /// Put back the version that existed before a failed operation.
    ///
    /// `None` removes a document the failed operation created.
    fn restore(
        &mut self,
        tier: DocTier,
        id: &str,
        prior: Option<&PromptDocument>,
    ) -> Result<(), EngineError>;

    /// Ids stored under a tier, sorted.
    fn ids(&self, tier: DocTier) -> Result<Vec<String>, EngineError>;

    /// Fetch only the body text.
    fn get_text(&self, tier: DocTier, id: &str) -> Result<Option<String>, EngineError> {
        Ok(self.get(tier, id)?.map(|doc| doc.body))
    }

    /// Check whether a document exists.
    fn contains(&self, tier: DocTier, id: &str) -> Result<bool, EngineError> {
        Ok(self.get(tier, id)?.is_some())
    }

    /// Check whether an index path (`<tier>/<id>`) resolves to a document.
    ///
    /// Malformed paths do not resolve.
    fn resolves(&self, path: &str) -> Result<bool, EngineError> {
        match DocPath::parse(path) {
            Ok(p) => self.contains(p.tier, &p.id),
            Err(_) => Ok(false),
        }
    }

    /// Write body text, creating the document or revising it non-destructively.
    fn put_text(
        &mut self,
        tier: DocTier,
        id: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<PromptDocument, EngineError> {
        crate::types::validate_document_id(id)?;
        let doc = match self.get(tier, id)? {
            Some(mut doc) => {
                if doc.body != text {
                    doc.revise(text, now, "body replaced");
                }
                doc
            }
            None => {
                let mut doc = PromptDocument::new(tier, id, text);
                doc.amend(now, "created");
                doc
            }
        };
        self.put(&doc)?;
        Ok(doc)
    }
}

// =============================================================================
// TESTS
// =============================================================================
