//! # Context Assembler
//!
//! Builds the ordered [`ContextBundle`] a working session loads.
//!
//! Assembly is read-only and deterministic: the same state, index and
//! document contents always yield a byte-identical bundle.
//!
//! ## Order
//!
//! 1. Master document (required)
//! 2. Current phase document (empty if absent)
//! 3. Module documents, one per distinct module resolved from the critical tier
//! 4. Knowledge references: phase-scoped, then module-scoped, duplicates removed
//! 5. Emergency documents for active blockers (separate field)

use crate::config::EngineConfig;
use crate::index::{Dimension, KnowledgeIndex};
use crate::resolver::ModuleResolver;
use crate::store::DocumentStore;
use crate::{
    BundledDocument, ContextBundle, DocPath, DocRef, DocTier, EngineError, PriorityTier,
    ProjectState, Warning,
};
use serde::Serialize;
use std::collections::BTreeSet;

/// Id of the one master document.
pub const MASTER_DOCUMENT_ID: &str = "master";

/// A bundle plus the non-fatal conditions met while building it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assembly {
    pub bundle: ContextBundle,
    pub warnings: Vec<Warning>,
}

/// The Context Assembler.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    resolver: ModuleResolver,
    include_emergency: bool,
}

impl ContextAssembler {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            resolver: ModuleResolver::new(&config.keywords),
            include_emergency: config.assembly.include_emergency,
        }
    }

    #[must_use]
    pub fn resolver(&self) -> &ModuleResolver {
        &self.resolver
    }

    /// Distinct modules named by critical tasks, in first-seen task order.
    #[must_use]
    pub fn critical_modules(&self, state: &ProjectState) -> Vec<String> {
        let mut seen = BTreeSet::new();
        state
            .tier(PriorityTier::Critical)
            .iter()
            .filter_map(|task| self.resolver.resolve(task))
            .filter(|module| seen.insert(module.to_string()))
            .map(str::to_string)
            .collect()
    }

    /// Assemble the bundle for the current state.
    ///
    /// Fails only when the master document is absent or the store errors.
    pub fn assemble<D: DocumentStore + ?Sized>(
        &self,
        state: &ProjectState,
        index: &KnowledgeIndex,
        store: &D,
    ) -> Result<Assembly, EngineError> {
        let mut warnings = Vec::new();

        let master = store
            .get_text(DocTier::Master, MASTER_DOCUMENT_ID)?
            .ok_or(EngineError::MissingMasterDocument)?;

        let phase = store
            .get_text(DocTier::Phase, state.phase.as_str())?
            .unwrap_or_default();

        let module_ids = self.critical_modules(state);
        let mut modules = Vec::with_capacity(module_ids.len());
        for module in &module_ids {
            match store.get_text(DocTier::Module, module)? {
                Some(body) => modules.push(BundledDocument {
                    id: module.clone(),
                    body,
                }),
                None => warnings.push(Warning::MissingModuleDocument {
                    module: module.clone(),
                }),
            }
        }

        // Module refs use every resolved module, documented or not.
        let mut knowledge_refs: Vec<DocRef> = Vec::new();
        let mut seen_paths = BTreeSet::new();
        let scopes = std::iter::once((Dimension::Phase, state.phase.as_str()))
            .chain(module_ids.iter().map(|m| (Dimension::Module, m.as_str())));
        for (dimension, key) in scopes {
            for doc in index.lookup(dimension, key) {
                let address = DocPath::parse(&doc.path)
                    .map(|p| p.to_string())
                    .unwrap_or_else(|_| doc.path.trim().to_string());
                if !seen_paths.insert(address) {
                    continue;
                }
                if store.resolves(&doc.path)? {
                    knowledge_refs.push(doc.clone());
                } else {
                    warnings.push(Warning::DanglingIndexReference {
                        dimension: dimension.to_string(),
                        key: key.to_string(),
                        path: doc.path.clone(),
                    });
                }
            }
        }

        let mut emergency = Vec::new();
        if self.include_emergency {
            for blocker in &state.blockers {
                let body = if crate::types::validate_document_id(blocker).is_ok() {
                    store.get_text(DocTier::Emergency, blocker)?
                } else {
                    None
                };
                match body {
                    Some(body) => emergency.push(BundledDocument {
                        id: blocker.clone(),
                        body,
                    }),
                    None => warnings.push(Warning::MissingEmergencyDocument {
                        blocker: blocker.clone(),
                    }),
                }
            }
        }

        Ok(Assembly {
            bundle: ContextBundle {
                master,
                phase,
                modules,
                knowledge_refs,
                emergency,
            },
            warnings,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
