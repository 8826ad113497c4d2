//! # Engine Configuration
//!
//! Deployment-tunable policy: the ordered phase list, transition thresholds,
//! the keyword→module table, assembly switches and the document backend.
//!
//! The core only defines and validates the structure. Reading it from disk
//! (`phasebook.toml`) is the app layer's job.

use crate::primitives::{DEFAULT_HIGH_PRIORITY_THRESHOLD_PERCENT, DEFAULT_PHASES, MAX_HEALTH_SCORE};
use crate::{EngineError, PhaseId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// ENGINE CONFIG
// =============================================================================

/// Complete engine configuration. Every section has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub phases: PhaseOrder,
    pub transition: TransitionPolicy,
    pub keywords: Vec<KeywordRule>,
    pub assembly: AssemblyConfig,
    pub storage: StorageConfig,
}

impl EngineConfig {
    /// Default configuration with the stock keyword table.
    #[must_use]
    pub fn with_default_keywords() -> Self {
        Self {
            keywords: KeywordRule::defaults(),
            ..Self::default()
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), EngineError> {
        self.phases.validate()?;
        self.transition.validate()?;
        for (position, rule) in self.keywords.iter().enumerate() {
            if rule.keyword.trim().is_empty() || rule.module.trim().is_empty() {
                return Err(EngineError::Config(format!(
                    "keyword rule #{} must have a non-empty keyword and module",
                    position
                )));
            }
            crate::types::validate_document_id(&rule.module)
                .map_err(|e| EngineError::Config(format!("keyword rule #{}: {}", position, e)))?;
        }
        Ok(())
    }
}

// =============================================================================
// PHASE ORDER
// =============================================================================

/// The fixed, ordered enumeration of phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseOrder {
    pub order: Vec<PhaseId>,
}

impl Default for PhaseOrder {
    fn default() -> Self {
        Self {
            order: DEFAULT_PHASES.iter().map(|p| PhaseId::new(*p)).collect(),
        }
    }
}

impl PhaseOrder {
    /// Build an order from phase names.
    #[must_use]
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            order: names.into_iter().map(|n| PhaseId::new(n)).collect(),
        }
    }

    /// Position of a phase in the lifecycle.
    #[must_use]
    pub fn rank(&self, phase: &PhaseId) -> Option<usize> {
        self.order.iter().position(|p| p == phase)
    }

    #[must_use]
    pub fn contains(&self, phase: &PhaseId) -> bool {
        self.rank(phase).is_some()
    }

    /// Get the first phase, if any.
    #[must_use]
    pub fn first(&self) -> Option<&PhaseId> {
        self.order.first()
    }

    /// Get the phase after `phase`, if any.
    #[must_use]
    pub fn next(&self, phase: &PhaseId) -> Option<&PhaseId> {
        let rank = self.rank(phase)?;
        self.order.get(rank.saturating_add(1))
    }

    /// Compare two phases by lifecycle position.
    ///
    /// Returns `None` if either phase is unknown.
    #[must_use]
    pub fn compare(&self, a: &PhaseId, b: &PhaseId) -> Option<Ordering> {
        Some(self.rank(a)?.cmp(&self.rank(b)?))
    }

    /// Resolve a phase name, failing with `UnknownPhase` if it is not configured.
    pub fn require(&self, name: &str) -> Result<PhaseId, EngineError> {
        let phase = PhaseId::new(name.trim());
        if self.contains(&phase) {
            Ok(phase)
        } else {
            Err(EngineError::UnknownPhase(name.to_string()))
        }
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.order.is_empty() {
            return Err(EngineError::Config("phases.order must not be empty".into()));
        }
        let mut seen = BTreeSet::new();
        for phase in &self.order {
            crate::types::validate_document_id(phase.as_str())
                .map_err(|e| EngineError::Config(format!("phase '{}': {}", phase, e)))?;
            if !seen.insert(phase) {
                return Err(EngineError::Config(format!(
                    "phase '{}' appears more than once in phases.order",
                    phase
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// TRANSITION POLICY
// =============================================================================

/// Thresholds the phase gate applies.
///
/// All ratios are integer percentages; no floating point is involved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransitionPolicy {
    /// Minimum completed share of high-priority tasks, 0..=100.
    pub high_priority_threshold_percent: u8,
    /// Refuse advancement while any blocker is recorded.
    pub require_no_blockers: bool,
    /// Minimum score per health metric. A floor on a missing metric fails.
    pub health_floors: BTreeMap<String, u8>,
}

impl Default for TransitionPolicy {
    fn default() -> Self {
        Self {
            high_priority_threshold_percent: DEFAULT_HIGH_PRIORITY_THRESHOLD_PERCENT,
            require_no_blockers: true,
            health_floors: BTreeMap::new(),
        }
    }
}

impl TransitionPolicy {
    fn validate(&self) -> Result<(), EngineError> {
        if self.high_priority_threshold_percent > 100 {
            return Err(EngineError::Config(format!(
                "transition.high_priority_threshold_percent must be 0..=100, got {}",
                self.high_priority_threshold_percent
            )));
        }
        for (metric, floor) in &self.health_floors {
            if *floor > MAX_HEALTH_SCORE {
                return Err(EngineError::Config(format!(
                    "transition.health_floors.{} must be 0..={}, got {}",
                    metric, MAX_HEALTH_SCORE, floor
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// KEYWORD TABLE
// =============================================================================

/// Maps a keyword found in a task description to a module id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeywordRule {
    pub keyword: String,
    pub module: String,
}

impl KeywordRule {
    #[must_use]
    pub fn new(keyword: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            module: module.into(),
        }
    }

    /// Stock table used by `phasebook init`.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("database", "database"),
            Self::new("schema", "database"),
            Self::new("api", "api"),
            Self::new("endpoint", "api"),
            Self::new("authentication", "auth"),
            Self::new("frontend", "frontend"),
            Self::new("deploy", "deployment"),
        ]
    }
}

// =============================================================================
// ASSEMBLY & STORAGE
// =============================================================================

/// Switches for the context assembler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssemblyConfig {
    /// Load `emergency/<blocker>` documents while blockers are recorded.
    pub include_emergency: bool,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            include_emergency: true,
        }
    }
}

/// Which document store backend a project uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentBackend {
    /// One text file per document plus a JSON update log.
    #[default]
    Files,
    /// A single redb database.
    Redb,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub documents: DocumentBackend,
}

// =============================================================================
// TESTS
// =============================================================================
