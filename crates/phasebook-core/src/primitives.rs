//! # Engine Primitives
//!
//! Fixed constants compiled into the engine. Everything a deployment is
//! expected to tune lives in [`crate::config`] instead.

/// Version tag written into every persisted state record.
///
/// Increment this when making breaking changes to the state schema.
pub const STATE_FORMAT_VERSION: u32 = 1;

/// Default completion threshold for the high-priority tier, in percent.
pub const DEFAULT_HIGH_PRIORITY_THRESHOLD_PERCENT: u8 = 90;

/// Upper bound of every health metric score.
pub const MAX_HEALTH_SCORE: u8 = 100;

/// Phases used when no configuration is supplied, in lifecycle order.
pub const DEFAULT_PHASES: &[&str] = &[
    "planning",
    "design",
    "implementation",
    "testing",
    "deployment",
    "maintenance",
];

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum size of a persisted state record (16 MB).
///
/// Validated before any parsing so a runaway file cannot exhaust memory.
pub const MAX_STATE_FILE_SIZE: usize = 16 * 1024 * 1024;

/// Maximum size of a knowledge index file (16 MB).
pub const MAX_INDEX_FILE_SIZE: usize = 16 * 1024 * 1024;

/// Maximum length of a document id.
pub const MAX_DOCUMENT_ID_LENGTH: usize = 128;

/// Maximum length of a task description or session summary.
pub const MAX_TEXT_LENGTH: usize = 64 * 1024;
