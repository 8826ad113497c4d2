//! # phasebook-core
//!
//! The deterministic phase engine for phasebook.
//!
//! This crate keeps a long-running project's layered instruction documents
//! consistent with one source of truth, the project state record:
//! - `state` / `record`: the record and its only write path
//! - `system`: the phase gate (pure transition evaluation)
//! - `assembler`: ordered context bundles for a working session
//! - `session` / `engine`: the all-or-nothing session update protocol
//! - `store` / `index`: documents and the knowledge index that points at them
//!
//! ## Architectural Constraints
//!
//! - Clock values are passed in; nothing reads the system time
//! - Ordered collections only, so every output is reproducible
//! - No async, no network dependencies
//! - Non-fatal conditions are returned as `Warning`s, never logged and dropped

// =============================================================================
// MODULES
// =============================================================================

pub mod assembler;
pub mod changelog;
pub mod config;
pub mod engine;
pub mod formats;
pub mod index;
pub mod primitives;
pub mod record;
pub mod resolver;
pub mod session;
pub mod state;
pub mod store;
pub mod system;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    BundledDocument, ContextBundle, DocPath, DocRef, DocTier, EngineError, PhaseHistoryEntry,
    PhaseId, PriorityTier, PromptDocument, SessionRecord, TaskRef, TaskStatus, TransitionKind,
    UpdateLogEntry, Warning,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use assembler::{Assembly, ContextAssembler, MASTER_DOCUMENT_ID};
pub use changelog::{ChangeKind, Changelog, ChangelogEntry, FileChangelog, MemoryChangelog};
pub use config::{
    AssemblyConfig, DocumentBackend, EngineConfig, KeywordRule, PhaseOrder, StorageConfig,
    TransitionPolicy,
};
pub use engine::{Engine, SessionOutcome, StateUpdate, TransitionOutcome};
pub use index::{Dimension, IndexReport, KnowledgeIndex};
pub use record::{
    BackendLock, FileStateBackend, Initialization, MemoryStateBackend, StateBackend, StateRecord,
    Transaction,
};
pub use resolver::ModuleResolver;
pub use session::{SessionInput, SessionPlan, plan_session};
pub use state::ProjectState;
pub use store::{DocumentStore, FileDocumentStore, MemoryDocumentStore, RedbDocumentStore};

// =============================================================================
// RE-EXPORTS: Formats & System
// =============================================================================

pub use formats::{state_from_bytes, state_to_bytes};
pub use system::{GateProgress, PhaseGate, TransitionVerdict};
