//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the engine:
//! - Phase and task identifiers (`PhaseId`, `PriorityTier`, `TaskStatus`, `TaskRef`)
//! - History records (`PhaseHistoryEntry`, `TransitionKind`, `SessionRecord`)
//! - Documents (`DocTier`, `DocPath`, `DocRef`, `PromptDocument`, `UpdateLogEntry`)
//! - Assembly output (`ContextBundle`, `BundledDocument`)
//! - Error types (`EngineError`) and non-fatal diagnostics (`Warning`)
//!
//! ## Determinism Guarantees
//!
//! All collections are `BTreeMap`/`BTreeSet` or ordered `Vec`s, so every
//! serialization of the same value is byte-identical.

use crate::primitives::MAX_DOCUMENT_ID_LENGTH;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// PHASE IDENTIFIER
// =============================================================================

/// Name of a lifecycle phase.
///
/// Phases are plain names; their ordering comes from the configured
/// [`PhaseOrder`](crate::config::PhaseOrder), never from string comparison.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhaseId(pub String);

impl PhaseId {
    /// Create a phase id from a string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the phase id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// TASKS
// =============================================================================

/// Priority tier a task is planned under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    Critical,
    High,
    Medium,
    Low,
}

impl PriorityTier {
    /// All tiers, most urgent first.
    pub const ALL: [PriorityTier; 4] = [Self::Critical, Self::High, Self::Medium, Self::Low];

    /// Get the tier name as used in persisted records.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriorityTier {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(EngineError::InvalidInput(format!(
                "Unknown priority tier: {}. Use: critical, high, medium, low",
                other
            ))),
        }
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    NotStarted,
    InProgress,
    Blocked,
    Complete,
}

impl TaskStatus {
    /// Get the status name as used in persisted records.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "not_started" => Ok(Self::NotStarted),
            "in_progress" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "complete" => Ok(Self::Complete),
            other => Err(EngineError::InvalidInput(format!(
                "Unknown task status: {}. Use: not_started, in_progress, blocked, complete",
                other
            ))),
        }
    }
}

/// A planned unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    pub description: String,
    /// Module the task belongs to, overriding keyword resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_hint: Option<String>,
    pub status: TaskStatus,
}

impl TaskRef {
    /// Create a task that has not been started.
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            module_hint: None,
            status: TaskStatus::NotStarted,
        }
    }

    /// Set the module hint.
    #[must_use]
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module_hint = Some(module.into());
        self
    }

    /// Set the status.
    #[must_use]
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == TaskStatus::Complete
    }

    /// Check whether a free-form reference names this task.
    ///
    /// Matching is exact after trimming and ASCII case folding.
    #[must_use]
    pub fn matches(&self, reference: &str) -> bool {
        self.description
            .trim()
            .eq_ignore_ascii_case(reference.trim())
    }
}

// =============================================================================
// HISTORY RECORDS
// =============================================================================

/// How a phase was entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionKind {
    /// The phase the project was initialised in.
    Initial,
    /// A confirmed forward transition.
    #[default]
    Advance,
    /// An explicit, logged move back to an earlier phase.
    Rollback { reason: String },
}

impl TransitionKind {
    #[must_use]
    pub fn is_rollback(&self) -> bool {
        matches!(self, Self::Rollback { .. })
    }
}

/// One stay in a phase. The open entry (no `exited_at`) is the current phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseHistoryEntry {
    pub phase: PhaseId,
    pub entered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub transition: TransitionKind,
}

impl PhaseHistoryEntry {
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.exited_at.is_none()
    }
}

/// Result of one working session. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub timestamp: DateTime<Utc>,
    pub summary: String,
    #[serde(default)]
    pub tasks_completed: Vec<String>,
    #[serde(default)]
    pub issues_raised: Vec<String>,
}

// =============================================================================
// DOCUMENTS
// =============================================================================

/// Tier of a prompt document in the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocTier {
    Master,
    Phase,
    Module,
    Emergency,
}

impl DocTier {
    pub const ALL: [DocTier; 4] = [Self::Master, Self::Phase, Self::Module, Self::Emergency];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Phase => "phase",
            Self::Module => "module",
            Self::Emergency => "emergency",
        }
    }
}

impl fmt::Display for DocTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocTier {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "master" => Ok(Self::Master),
            "phase" => Ok(Self::Phase),
            "module" => Ok(Self::Module),
            "emergency" => Ok(Self::Emergency),
            other => Err(EngineError::InvalidInput(format!(
                "Unknown document tier: {}. Use: master, phase, module, emergency",
                other
            ))),
        }
    }
}

/// Validate a document id before it is used as a storage key.
///
/// Ids become file names in the file-backed store, so separators and
/// parent references are rejected outright.
pub fn validate_document_id(id: &str) -> Result<(), EngineError> {
    if id.is_empty() || id.len() > MAX_DOCUMENT_ID_LENGTH {
        return Err(EngineError::InvalidInput(format!(
            "Document id must be 1..={} bytes, got {}",
            MAX_DOCUMENT_ID_LENGTH,
            id.len()
        )));
    }
    if id.contains(['/', '\\']) || id.starts_with('.') || id.chars().any(char::is_control) {
        return Err(EngineError::InvalidInput(format!(
            "Document id '{}' contains forbidden characters",
            id
        )));
    }
    Ok(())
}

/// Address of a document: `<tier>/<id>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocPath {
    pub tier: DocTier,
    pub id: String,
}

impl DocPath {
    #[must_use]
    pub fn new(tier: DocTier, id: impl Into<String>) -> Self {
        Self {
            tier,
            id: id.into(),
        }
    }

    /// Parse `<tier>/<id>`, accepting an optional `.md` suffix.
    pub fn parse(path: &str) -> Result<Self, EngineError> {
        let trimmed = path.trim();
        let (tier, id) = trimmed.split_once('/').ok_or_else(|| {
            EngineError::InvalidInput(format!("Document path '{}' is not <tier>/<id>", path))
        })?;
        let id = id.strip_suffix(".md").unwrap_or(id);
        let tier: DocTier = tier.parse()?;
        validate_document_id(id)?;
        Ok(Self::new(tier, id))
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tier, self.id)
    }
}

/// Reference to a document from the knowledge index.
///
/// Deserializes from either a bare path string or `{ "path", "tags" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "DocRefRepr")]
pub struct DocRef {
    pub path: String,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

impl DocRef {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            tags: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DocRefRepr {
    Path(String),
    Full {
        path: String,
        #[serde(default)]
        tags: BTreeSet<String>,
    },
}

impl From<DocRefRepr> for DocRef {
    fn from(repr: DocRefRepr) -> Self {
        match repr {
            DocRefRepr::Path(path) => Self::new(path),
            DocRefRepr::Full { path, tags } => Self { path, tags },
        }
    }
}

/// One entry of a document's append-only update log.
///
/// No field is skipped during serialization: documents are also stored in
/// postcard, which is not self-describing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLogEntry {
    pub timestamp: DateTime<Utc>,
    pub change_description: String,
    /// Body text replaced by this change, if the body was revised.
    #[serde(default)]
    pub superseded_body: Option<String>,
}

/// A layered instruction document.
///
/// Documents are never deleted and their history is never rewritten:
/// every change appends to `update_log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptDocument {
    pub tier: DocTier,
    pub id: String,
    pub body: String,
    #[serde(default)]
    pub update_log: Vec<UpdateLogEntry>,
}

impl PromptDocument {
    /// Create a document with the given body and an empty log.
    #[must_use]
    pub fn new(tier: DocTier, id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            tier,
            id: id.into(),
            body: body.into(),
            update_log: Vec::new(),
        }
    }

    /// Create the empty placeholder used when a phase or module is first referenced.
    #[must_use]
    pub fn placeholder(tier: DocTier, id: impl Into<String>) -> Self {
        Self::new(tier, id, String::new())
    }

    #[must_use]
    pub fn path(&self) -> DocPath {
        DocPath::new(self.tier, self.id.clone())
    }

    /// Append a log entry without touching the body.
    pub fn amend(&mut self, timestamp: DateTime<Utc>, change_description: impl Into<String>) {
        self.update_log.push(UpdateLogEntry {
            timestamp,
            change_description: change_description.into(),
            superseded_body: None,
        });
    }

    /// Replace the body, keeping the superseded text in the log.
    pub fn revise(
        &mut self,
        body: impl Into<String>,
        timestamp: DateTime<Utc>,
        change_description: impl Into<String>,
    ) {
        let previous = std::mem::replace(&mut self.body, body.into());
        self.update_log.push(UpdateLogEntry {
            timestamp,
            change_description: change_description.into(),
            superseded_body: Some(previous),
        });
    }
}

// =============================================================================
// CONTEXT BUNDLE
// =============================================================================

/// A document body placed into a bundle, tagged with its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundledDocument {
    pub id: String,
    pub body: String,
}

/// The ordered set of documents a session loads.
///
/// Order is a contract: master, phase, modules in task order, then
/// knowledge references (phase-scoped before module-scoped).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContextBundle {
    pub master: String,
    pub phase: String,
    pub modules: Vec<BundledDocument>,
    pub knowledge_refs: Vec<DocRef>,
    /// Emergency documents for active blockers, kept apart from the ordered fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emergency: Vec<BundledDocument>,
}

// =============================================================================
// NON-FATAL DIAGNOSTICS
// =============================================================================

/// A condition that did not stop the operation but must be reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// An index entry points at a document the store does not have.
    #[error("Dangling index reference under {dimension} '{key}': {path}")]
    DanglingIndexReference {
        dimension: String,
        key: String,
        path: String,
    },

    /// A completed-task reference matched no planned task.
    #[error("Unmatched task: '{description}'")]
    UnmatchedTask { description: String },

    /// A resolved module has no document yet.
    #[error("Module document not found: {module}")]
    MissingModuleDocument { module: String },

    /// An active blocker has no emergency document.
    #[error("Emergency document not found for blocker: {blocker}")]
    MissingEmergencyDocument { blocker: String },

    /// A resolved blocker was not in the blocker set.
    #[error("Blocker not present: {blocker}")]
    UnknownBlocker { blocker: String },

    /// The changelog could not be appended after a committed write.
    #[error("Changelog append failed: {reason}")]
    ChangelogAppendFailed { reason: String },
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that abort an engine operation.
///
/// - No silent failures
/// - Fatal errors leave all persisted state unchanged
/// - The engine never panics
#[derive(Debug, Error)]
pub enum EngineError {
    /// The master document is absent; assembly cannot proceed.
    #[error("Master document not found")]
    MissingMasterDocument,

    /// The state record failed decoding or validation.
    #[error("State corruption: {0}")]
    StateCorruption(String),

    /// A multi-step write failed and was rolled back.
    #[error("Partial write rolled back: {0}")]
    PartialWrite(String),

    /// No state record exists yet.
    #[error("Project not initialized: {0}")]
    NotInitialized(String),

    /// Another writer holds the state lock.
    #[error("State lock held: {0}")]
    LockHeld(String),

    /// A phase name is not part of the configured phase order.
    #[error("Unknown phase: {0}")]
    UnknownPhase(String),

    /// A phase change was requested but the evaluator did not approve it.
    #[error("Transition rejected: {}", .0.join("; "))]
    TransitionRejected(Vec<String>),

    /// Caller-supplied input is malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Engine configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

// =============================================================================
// TESTS
// =============================================================================
