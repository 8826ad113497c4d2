//! In-memory document store.

use super::DocumentStore;
use crate::{DocTier, EngineError, PromptDocument};
use std::collections::BTreeMap;

/// Documents held in a `BTreeMap` keyed by `(tier, id)`.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    docs: BTreeMap<(DocTier, String), PromptDocument>,
}

impl MemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from documents, for fixtures.
    #[must_use]
    pub fn with_documents<I>(docs: I) -> Self
    where
        I: IntoIterator<Item = PromptDocument>,
    {
        Self {
            docs: docs
                .into_iter()
                .map(|d| ((d.tier, d.id.clone()), d))
                .collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn get(&self, tier: DocTier, id: &str) -> Result<Option<PromptDocument>, EngineError> {
        Ok(self.docs.get(&(tier, id.to_string())).cloned())
    }

    fn put(&mut self, doc: &PromptDocument) -> Result<(), EngineError> {
        crate::types::validate_document_id(&doc.id)?;
        self.docs.insert((doc.tier, doc.id.clone()), doc.clone());
        Ok(())
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
                self.docs.remove(&(tier, id.to_string()));
                Ok(())
            }
        }
    }

    fn ids(&self, tier: DocTier) -> Result<Vec<String>, EngineError> {
        Ok(self
            .docs
            .keys()
            .filter(|(t, _)| *t == tier)
            .map(|(_, id)| id.clone())
            .collect())
    }
}
