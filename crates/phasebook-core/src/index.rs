//! # Knowledge Index
//!
//! Lookup structure mapping `(dimension, key)` to ordered document references.
//!
//! On-disk schema (JSON):
//!
//! ```json
//! {
//!   "index_by_phase":   { "testing":  ["phase/testing", "module/qa"] },
//!   "index_by_module":  { "database": [{ "path": "module/database", "tags": ["sql"] }] },
//!   "index_by_keyword": { "migration": ["module/database"] },
//!   "aggregated_rules": { "...": ["opaque advisory strings"] }
//! }
//! ```
//!
//! `aggregated_rules` is never interpreted; it is carried through unchanged.

use crate::primitives::MAX_INDEX_FILE_SIZE;
use crate::store::DocumentStore;
use crate::{DocRef, EngineError, Warning};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Lookup dimension of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Phase,
    Module,
    Keyword,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [Self::Phase, Self::Module, Self::Keyword];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phase => "phase",
            Self::Module => "module",
            Self::Keyword => "keyword",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "phase" => Ok(Self::Phase),
            "module" => Ok(Self::Module),
            "keyword" => Ok(Self::Keyword),
            other => Err(EngineError::InvalidInput(format!(
                "Unknown index dimension: {}. Use: phase, module, keyword",
                other
            ))),
        }
    }
}

/// The knowledge index, loaded and saved as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct KnowledgeIndex {
    #[serde(default)]
    pub index_by_phase: BTreeMap<String, Vec<DocRef>>,
    #[serde(default)]
    pub index_by_module: BTreeMap<String, Vec<DocRef>>,
    #[serde(default)]
    pub index_by_keyword: BTreeMap<String, Vec<DocRef>>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub aggregated_rules: serde_json::Value,
}

/// Outcome of an index integrity check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    /// Number of references inspected.
    pub checked: usize,
    /// One `DanglingIndexReference` per unresolved reference.
    pub warnings: Vec<Warning>,
}

impl IndexReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

impl KnowledgeIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an index from JSON, enforcing the size limit first.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, EngineError> {
        if bytes.len() > MAX_INDEX_FILE_SIZE {
            return Err(EngineError::Serialization(format!(
                "Index size {} bytes exceeds maximum allowed {} bytes",
                bytes.len(),
                MAX_INDEX_FILE_SIZE
            )));
        }
        serde_json::from_slice(bytes)
            .map_err(|e| EngineError::Serialization(format!("Invalid knowledge index: {}", e)))
    }

    /// Serialize the index as pretty JSON.
    pub fn to_json_vec(&self) -> Result<Vec<u8>, EngineError> {
        serde_json::to_vec_pretty(self).map_err(|e| EngineError::Serialization(e.to_string()))
    }

    fn dimension(&self, dimension: Dimension) -> &BTreeMap<String, Vec<DocRef>> {
        match dimension {
            Dimension::Phase => &self.index_by_phase,
            Dimension::Module => &self.index_by_module,
            Dimension::Keyword => &self.index_by_keyword,
        }
    }

    fn dimension_mut(&mut self, dimension: Dimension) -> &mut BTreeMap<String, Vec<DocRef>> {
        match dimension {
            Dimension::Phase => &mut self.index_by_phase,
            Dimension::Module => &mut self.index_by_module,
            Dimension::Keyword => &mut self.index_by_keyword,
        }
    }

    /// References under `(dimension, key)`, in index order. Unknown keys yield nothing.
    #[must_use]
    pub fn lookup(&self, dimension: Dimension, key: &str) -> &[DocRef] {
        self.dimension(dimension)
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Append a reference unless the same path is already listed under the key.
    pub fn insert(&mut self, dimension: Dimension, key: impl Into<String>, doc: DocRef) {
        let refs = self.dimension_mut(dimension).entry(key.into()).or_default();
        if !refs.iter().any(|r| r.path == doc.path) {
            refs.push(doc);
        }
    }

    /// Check every reference in every dimension against the store.
    pub fn verify<D: DocumentStore + ?Sized>(&self, store: &D) -> Result<IndexReport, EngineError> {
        let mut checked = 0usize;
        let mut warnings = Vec::new();
        for dimension in Dimension::ALL {
            for (key, refs) in self.dimension(dimension) {
                for doc in refs {
                    checked = checked.saturating_add(1);
                    if !store.resolves(&doc.path)? {
                        warnings.push(Warning::DanglingIndexReference {
                            dimension: dimension.to_string(),
                            key: key.clone(),
                            path: doc.path.clone(),
                        });
                    }
                }
            }
        }
        Ok(IndexReport { checked, warnings })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDocumentStore;
    use crate::{DocTier, PromptDocument};

    const SAMPLE: &str = r#"{
        "index_by_phase": {"testing": ["phase/testing", {"path": "module/qa", "tags": ["ci"]}]},
        "index_by_module": {"database": ["module/database"]},
        "aggregated_rules": {"style": ["prefer small commits"], "weight": 3}
    }"#;

    #[test]
    fn parses_mixed_entry_forms() {
        let index = KnowledgeIndex::from_json_slice(SAMPLE.as_bytes()).expect("parse");
        let refs = index.lookup(Dimension::Phase, "testing");
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1], DocRef::new("module/qa").with_tags(["ci"]));
        assert!(index.lookup(Dimension::Keyword, "anything").is_empty());
    }

    #[test]
    fn aggregated_rules_pass_through() {
        let index = KnowledgeIndex::from_json_slice(SAMPLE.as_bytes()).expect("parse");
        let bytes = index.to_json_vec().expect("serialize");
        let reparsed = KnowledgeIndex::from_json_slice(&bytes).expect("reparse");
        assert_eq!(reparsed.aggregated_rules, index.aggregated_rules);
        assert_eq!(reparsed.aggregated_rules["weight"], 3);
    }

    #[test]
    fn insert_deduplicates_by_path() {
        let mut index = KnowledgeIndex::new();
        index.insert(Dimension::Module, "api", DocRef::new("module/api"));
        index.insert(Dimension::Module, "api", DocRef::new("module/api").with_tags(["x"]));
        assert_eq!(index.lookup(Dimension::Module, "api").len(), 1);
    }

    #[test]
    fn verify_reports_each_dangling_reference() {
        let index = KnowledgeIndex::from_json_slice(SAMPLE.as_bytes()).expect("parse");
        let store = MemoryDocumentStore::with_documents([PromptDocument::new(
            DocTier::Phase,
            "testing",
            "",
        )]);

        let report = index.verify(&store).expect("verify");
        assert_eq!(report.checked, 3);
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings.contains(&Warning::DanglingIndexReference {
            dimension: "module".into(),
            key: "database".into(),
            path: "module/database".into(),
        }));
    }
}
