//! # Project State
//!
//! The single source of truth for a project: current phase, phase history,
//! tiered task lists, health metrics, session history and blockers.
//!
//! `ProjectState` is plain data. It is only written through
//! [`StateRecord`](crate::record::StateRecord), which validates it with
//! [`ProjectState::validate`] on every load and before every store.

use crate::config::PhaseOrder;
use crate::primitives::{MAX_HEALTH_SCORE, MAX_TEXT_LENGTH};
use crate::{
    EngineError, PhaseHistoryEntry, PhaseId, PriorityTier, SessionRecord, TaskRef, TransitionKind,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// The root record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectState {
    pub phase: PhaseId,
    pub phase_history: Vec<PhaseHistoryEntry>,
    #[serde(default)]
    pub tasks: BTreeMap<PriorityTier, Vec<TaskRef>>,
    #[serde(default)]
    pub health_metrics: BTreeMap<String, u8>,
    #[serde(default)]
    pub session_history: Vec<SessionRecord>,
    #[serde(default)]
    pub blockers: BTreeSet<String>,
}

impl ProjectState {
    /// Create a fresh record starting in `phase`.
    #[must_use]
    pub fn new(phase: PhaseId, now: DateTime<Utc>) -> Self {
        Self {
            phase_history: vec![PhaseHistoryEntry {
                phase: phase.clone(),
                entered_at: now,
                exited_at: None,
                transition: TransitionKind::Initial,
            }],
            phase,
            tasks: BTreeMap::new(),
            health_metrics: BTreeMap::new(),
            session_history: Vec::new(),
            blockers: BTreeSet::new(),
        }
    }

    // =========================================================================
    // TASKS
    // =========================================================================

    /// Tasks planned under a tier, in planning order.
    #[must_use]
    pub fn tier(&self, tier: PriorityTier) -> &[TaskRef] {
        self.tasks.get(&tier).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Append a task to a tier.
    pub fn push_task(&mut self, tier: PriorityTier, task: TaskRef) {
        self.tasks.entry(tier).or_default().push(task);
    }

    /// Find the first task matching `reference`, searching tiers most urgent first.
    pub fn find_task_mut(&mut self, reference: &str) -> Option<(PriorityTier, &mut TaskRef)> {
        self.tasks.iter_mut().find_map(|(tier, tasks)| {
            tasks
                .iter_mut()
                .find(|t| t.matches(reference))
                .map(|t| (*tier, t))
        })
    }

    /// Number of tasks across all tiers.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.values().map(Vec::len).sum()
    }

    // =========================================================================
    // PHASE HISTORY
    // =========================================================================

    /// The open history entry, if the record is well formed.
    #[must_use]
    pub fn current_entry(&self) -> Option<&PhaseHistoryEntry> {
        self.phase_history.last().filter(|e| e.is_open())
    }

    /// Close the current history entry and open one for `target`.
    ///
    /// This only edits the record; callers decide whether the move is allowed.
    pub fn enter_phase(&mut self, target: PhaseId, transition: TransitionKind, now: DateTime<Utc>) {
        if let Some(open) = self.phase_history.iter_mut().rev().find(|e| e.is_open()) {
            open.exited_at = Some(now);
        }
        self.phase_history.push(PhaseHistoryEntry {
            phase: target.clone(),
            entered_at: now,
            exited_at: None,
            transition,
        });
        self.phase = target;
    }

    // =========================================================================
    // VALIDATION
    // =========================================================================

    /// Check schema-level invariants that serde alone cannot express.
    ///
    /// Any violation is reported as `StateCorruption`; nothing is repaired.
    pub fn validate(&self, phases: &PhaseOrder) -> Result<(), EngineError> {
        let corrupt = |msg: String| Err(EngineError::StateCorruption(msg));

        if !phases.contains(&self.phase) {
            return corrupt(format!("current phase '{}' is not configured", self.phase));
        }

        let open_entries = self.phase_history.iter().filter(|e| e.is_open()).count();
        if open_entries != 1 {
            return corrupt(format!(
                "phase history must have exactly one open entry, found {}",
                open_entries
            ));
        }
        match self.phase_history.last() {
            Some(last) if last.is_open() && last.phase == self.phase => {}
            _ => {
                return corrupt(format!(
                    "last phase history entry must be the open entry for '{}'",
                    self.phase
                ));
            }
        }

        for entry in &self.phase_history {
            if !phases.contains(&entry.phase) {
                return corrupt(format!(
                    "phase history names unknown phase '{}'",
                    entry.phase
                ));
            }
            if let Some(exited) = entry.exited_at
                && exited < entry.entered_at
            {
                return corrupt(format!(
                    "phase history entry for '{}' exits before it was entered",
                    entry.phase
                ));
            }
        }

        for pair in self.phase_history.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.entered_at < prev.entered_at {
                return corrupt("phase history is not in chronological order".into());
            }
            let backwards = phases.compare(&next.phase, &prev.phase) == Some(Ordering::Less);
            if backwards && !next.transition.is_rollback() {
                return corrupt(format!(
                    "phase moved back from '{}' to '{}' without a recorded rollback",
                    prev.phase, next.phase
                ));
            }
        }

        for (metric, score) in &self.health_metrics {
            if *score > MAX_HEALTH_SCORE {
                return corrupt(format!(
                    "health metric '{}' is {}, outside 0..={}",
                    metric, score, MAX_HEALTH_SCORE
                ));
            }
        }

        for (tier, tasks) in &self.tasks {
            for task in tasks {
                if task.description.trim().is_empty() {
                    return corrupt(format!("{} tier contains a task with no description", tier));
                }
                if task.description.len() > MAX_TEXT_LENGTH {
                    return corrupt(format!("{} tier contains an oversized task", tier));
                }
                if let Some(hint) = &task.module_hint
                    && crate::types::validate_document_id(hint.trim()).is_err()
                    && !hint.trim().is_empty()
                {
                    return corrupt(format!(
                        "task '{}' has an invalid module hint '{}'",
                        task.description, hint
                    ));
                }
            }
        }

        if self.blockers.iter().any(|b| b.trim().is_empty()) {
            return corrupt("blockers contain an empty identifier".into());
        }

        Ok(())
    }

    /// Check that `self` only extends the histories of `prev`.
    ///
    /// Session records are immutable once appended. Phase history entries
    /// are too, except that the entry open in `prev` may be closed.
    pub fn check_succession(&self, prev: &ProjectState) -> Result<(), EngineError> {
        let rewritten = |what: &str| {
            Err(EngineError::InvalidInput(format!(
                "{} is append-only; existing entries cannot be removed or changed",
                what
            )))
        };

        if !self.session_history.starts_with(&prev.session_history) {
            return rewritten("session history");
        }

        let Some((prev_last, prev_closed)) = prev.phase_history.split_last() else {
            return Ok(());
        };
        if !self.phase_history.starts_with(prev_closed) {
            return rewritten("phase history");
        }
        let Some(next_last) = self.phase_history.get(prev_closed.len()) else {
            return rewritten("phase history");
        };
        let same_entry = next_last.phase == prev_last.phase
            && next_last.entered_at == prev_last.entered_at
            && next_last.transition == prev_last.transition;
        let exit_kept = prev_last.exited_at.is_none() || next_last.exited_at == prev_last.exited_at;
        if !same_entry || !exit_kept {
            return rewritten("phase history");
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaskStatus;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    fn implementation_state() -> ProjectState {
        ProjectState::new(PhaseId::new("implementation"), ts(0))
    }

    #[test]
    fn new_state_is_valid() {
        let state = implementation_state();
        assert!(state.validate(&PhaseOrder::default()).is_ok());
        assert_eq!(state.current_entry().map(|e| &e.phase), Some(&state.phase));
    }

    #[test]
    fn enter_phase_closes_previous_entry() {
        let mut state = implementation_state();
        state.enter_phase(PhaseId::new("testing"), TransitionKind::Advance, ts(10));

        assert_eq!(state.phase, PhaseId::new("testing"));
        assert_eq!(state.phase_history.len(), 2);
        assert_eq!(state.phase_history[0].exited_at, Some(ts(10)));
        assert!(state.validate(&PhaseOrder::default()).is_ok());
    }

    #[test]
    fn silent_backwards_move_is_corruption() {
        let mut state = implementation_state();
        state.enter_phase(PhaseId::new("design"), TransitionKind::Advance, ts(10));

        let result = state.validate(&PhaseOrder::default());
        assert!(matches!(result, Err(EngineError::StateCorruption(_))));
    }

    #[test]
    fn recorded_rollback_is_allowed() {
        let mut state = implementation_state();
        state.enter_phase(
            PhaseId::new("design"),
            TransitionKind::Rollback {
                reason: "schema rethink".into(),
            },
            ts(10),
        );
        assert!(state.validate(&PhaseOrder::default()).is_ok());
    }

    #[test]
    fn two_open_entries_is_corruption() {
        let mut state = implementation_state();
        state.phase_history.push(PhaseHistoryEntry {
            phase: PhaseId::new("implementation"),
            entered_at: ts(5),
            exited_at: None,
            transition: TransitionKind::Advance,
        });
        assert!(state.validate(&PhaseOrder::default()).is_err());
    }

    #[test]
    fn health_above_hundred_is_corruption() {
        let mut state = implementation_state();
        state.health_metrics.insert("coverage".into(), 101);
        assert!(state.validate(&PhaseOrder::default()).is_err());
    }

    #[test]
    fn succession_allows_appending_and_closing() {
        let prev = implementation_state();
        let mut next = prev.clone();
        next.enter_phase(PhaseId::new("testing"), TransitionKind::Advance, ts(10));
        assert!(next.check_succession(&prev).is_ok());
        assert!(prev.check_succession(&prev).is_ok());
    }

    #[test]
    fn succession_rejects_reopened_or_dropped_entries() {
        let mut prev = implementation_state();
        prev.enter_phase(PhaseId::new("testing"), TransitionKind::Advance, ts(10));

        let mut reopened = prev.clone();
        reopened.phase_history[0].exited_at = None;
        assert!(matches!(
            reopened.check_succession(&prev),
            Err(EngineError::InvalidInput(_))
        ));

        let mut dropped = prev.clone();
        dropped.phase_history.pop();
        assert!(dropped.check_succession(&prev).is_err());
    }

    #[test]
    fn find_task_searches_most_urgent_tier_first() {
        let mut state = implementation_state();
        state.push_task(PriorityTier::Low, TaskRef::new("Write docs"));
        state.push_task(PriorityTier::Critical, TaskRef::new("write docs"));

        let (tier, task) = state.find_task_mut("WRITE DOCS").expect("found");
        assert_eq!(tier, PriorityTier::Critical);
        task.status = TaskStatus::Complete;

        assert!(state.tier(PriorityTier::Critical)[0].is_complete());
        assert!(!state.tier(PriorityTier::Low)[0].is_complete());
    }
}
