//! # Persistence Format
//!
//! JSON encoding of the project state record.
//!
//! Format: a pretty-printed JSON object `{ "format_version": N, "state": {...} }`.
//! JSON is used so operators can hand-edit the record between sessions.
//!
//! ## Defensive Loading
//!
//! Decoding validates, in order, before the record is handed out:
//! - Maximum payload size (`MAX_STATE_FILE_SIZE`)
//! - Well-formed JSON and a supported `format_version`
//! - The `ProjectState` schema
//!
//! Invariant checks (`ProjectState::validate`) run afterwards in the record
//! layer, which knows the configured phase order.

use crate::primitives::{MAX_STATE_FILE_SIZE, STATE_FORMAT_VERSION};
use crate::{EngineError, ProjectState};
use serde::Serialize;

#[derive(Serialize)]
struct StateEnvelope<'a> {
    format_version: u32,
    state: &'a ProjectState,
}

/// Serialize a state record to bytes.
///
/// This is a pure transformation - no file I/O.
pub fn state_to_bytes(state: &ProjectState) -> Result<Vec<u8>, EngineError> {
    let envelope = StateEnvelope {
        format_version: STATE_FORMAT_VERSION,
        state,
    };
    let mut bytes = serde_json::to_vec_pretty(&envelope)
        .map_err(|e| EngineError::Serialization(e.to_string()))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Deserialize a state record from bytes.
///
/// Every failure is `StateCorruption`: a record that cannot be decoded is
/// surfaced for manual repair, never patched up.
pub fn state_from_bytes(bytes: &[u8]) -> Result<ProjectState, EngineError> {
    if bytes.len() > MAX_STATE_FILE_SIZE {
        return Err(EngineError::StateCorruption(format!(
            "state record is {} bytes, exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_STATE_FILE_SIZE
        )));
    }

    let mut value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| EngineError::StateCorruption(format!("state record is not JSON: {}", e)))?;

    let version = value
        .get("format_version")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| EngineError::StateCorruption("missing format_version".into()))?;
    if version != u64::from(STATE_FORMAT_VERSION) {
        return Err(EngineError::StateCorruption(format!(
            "unsupported format_version {} (expected {})",
            version, STATE_FORMAT_VERSION
        )));
    }

    let state = value
        .get_mut("state")
        .map(serde_json::Value::take)
        .ok_or_else(|| EngineError::StateCorruption("missing state object".into()))?;

    serde_json::from_value(state)
        .map_err(|e| EngineError::StateCorruption(format!("state schema violation: {}", e)))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PhaseId, PriorityTier, TaskRef};
    use chrono::{TimeZone, Utc};

    fn sample() -> ProjectState {
        let now = Utc.timestamp_opt(1_700_000_000, 0).single().expect("ts");
        let mut state = ProjectState::new(PhaseId::new("design"), now);
        state.push_task(PriorityTier::High, TaskRef::new("Sketch schema"));
        state.health_metrics.insert("coverage".into(), 72);
        state
    }

    #[test]
    fn bytes_roundtrip_bit_exact() {
        let bytes1 = state_to_bytes(&sample()).expect("first serialize");
        let restored = state_from_bytes(&bytes1).expect("deserialize");
        let bytes2 = state_to_bytes(&restored).expect("second serialize");

        assert_eq!(
            bytes1, bytes2,
            "save -> load -> save must produce identical bytes"
        );
    }

    #[test]
    fn wrong_version_rejected() {
        let bytes = br#"{"format_version": 99, "state": {}}"#;
        assert!(matches!(
            state_from_bytes(bytes),
            Err(EngineError::StateCorruption(_))
        ));
    }

    #[test]
    fn unknown_status_rejected() {
        let bytes = br#"{
            "format_version": 1,
            "state": {
                "phase": "design",
                "phase_history": [{"phase": "design", "entered_at": "2026-01-01T00:00:00Z"}],
                "tasks": {"critical": [{"description": "x", "status": "done"}]}
            }
        }"#;
        assert!(matches!(
            state_from_bytes(bytes),
            Err(EngineError::StateCorruption(_))
        ));
    }

    #[test]
    fn truncated_file_rejected() {
        let bytes = state_to_bytes(&sample()).expect("serialize");
        let truncated = &bytes[..bytes.len() / 2];
        assert!(state_from_bytes(truncated).is_err());
    }
}
