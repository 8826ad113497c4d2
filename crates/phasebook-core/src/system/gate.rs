//! # Phase Gate
//!
//! Decides whether the project qualifies to leave its current phase.
//!
//! ## Criteria
//!
//! | Check | Passes when |
//! |-------|-------------|
//! | Critical tier | every critical task is `complete` |
//! | High tier | completed share ≥ `high_priority_threshold_percent` (empty tier passes) |
//! | Blockers | blocker set is empty (if `require_no_blockers`) |
//! | Health floors | every configured metric is recorded and ≥ its floor |
//! | Lifecycle | a next phase exists |
//!
//! ## Important Note
//!
//! The gate only reports. It never mutates state and never performs the
//! transition; see `Engine::advance` for the confirmed, explicit operation.

use crate::config::{PhaseOrder, TransitionPolicy};
use crate::{PhaseId, PriorityTier, ProjectState, TaskRef};
use serde::{Deserialize, Serialize};

// =============================================================================
// GATE PROGRESS
// =============================================================================

/// Counts the verdict was computed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateProgress {
    pub critical_complete: usize,
    pub critical_total: usize,
    pub high_complete: usize,
    pub high_total: usize,
    /// Completed share of the high tier, 0..=100 (100 for an empty tier).
    pub high_percent: u8,
    pub blockers: usize,
}

impl GateProgress {
    /// Tally the task tiers and blockers of a state.
    #[must_use]
    pub fn from_state(state: &ProjectState) -> Self {
        let (critical_complete, critical_total) = tally(state.tier(PriorityTier::Critical));
        let (high_complete, high_total) = tally(state.tier(PriorityTier::High));
        Self {
            critical_complete,
            critical_total,
            high_complete,
            high_total,
            high_percent: percent(high_complete, high_total),
            blockers: state.blockers.len(),
        }
    }

    /// Integer threshold check: `complete / total >= threshold / 100`.
    #[must_use]
    pub fn high_meets(&self, threshold_percent: u8) -> bool {
        (self.high_complete as u64).saturating_mul(100)
            >= (threshold_percent as u64).saturating_mul(self.high_total as u64)
    }
}

fn tally(tasks: &[TaskRef]) -> (usize, usize) {
    let complete = tasks.iter().filter(|t| t.is_complete()).count();
    (complete, tasks.len())
}

fn percent(part: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((part as u64).saturating_mul(100) / (total as u64)).min(100) as u8
}

// =============================================================================
// TRANSITION VERDICT
// =============================================================================

/// The gate's report on phase advancement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionVerdict {
    pub eligible: bool,
    /// The phase to advance to; set only when eligible.
    pub target_phase: Option<PhaseId>,
    /// Why the verdict came out as it did, in check order.
    pub reasons: Vec<String>,
    pub progress: GateProgress,
}

// =============================================================================
// PHASE GATE
// =============================================================================

/// Phase Gate - pure function from state to verdict.
#[derive(Debug, Clone, Copy)]
pub struct PhaseGate<'a> {
    phases: &'a PhaseOrder,
    policy: &'a TransitionPolicy,
}

impl<'a> PhaseGate<'a> {
    #[must_use]
    pub fn new(phases: &'a PhaseOrder, policy: &'a TransitionPolicy) -> Self {
        Self { phases, policy }
    }

    /// Evaluate the state. Takes `&ProjectState`, so it cannot mutate it.
    #[must_use]
    pub fn evaluate(&self, state: &ProjectState) -> TransitionVerdict {
        let progress = GateProgress::from_state(state);
        let mut reasons = Vec::new();

        let next = self.phases.next(&state.phase).cloned();
        if !self.phases.contains(&state.phase) {
            reasons.push(format!("phase '{}' is not configured", state.phase));
        } else if next.is_none() {
            reasons.push(format!("'{}' is the final phase", state.phase));
        }

        for task in state.tier(PriorityTier::Critical) {
            if !task.is_complete() {
                reasons.push(format!(
                    "critical task incomplete: '{}' ({})",
                    task.description, task.status
                ));
            }
        }

        let threshold = self.policy.high_priority_threshold_percent;
        if !progress.high_meets(threshold) {
            reasons.push(format!(
                "high-priority completion {}% ({}/{}) is below the {}% threshold",
                progress.high_percent, progress.high_complete, progress.high_total, threshold
            ));
        }

        if self.policy.require_no_blockers && !state.blockers.is_empty() {
            let list: Vec<&str> = state.blockers.iter().map(String::as_str).collect();
            reasons.push(format!("unresolved blockers: {}", list.join(", ")));
        }

        for (metric, floor) in &self.policy.health_floors {
            match state.health_metrics.get(metric) {
                Some(score) if score >= floor => {}
                Some(score) => reasons.push(format!(
                    "health metric '{}' is {}, below the floor of {}",
                    metric, score, floor
                )),
                None => reasons.push(format!(
                    "health metric '{}' has not been recorded (floor {})",
                    metric, floor
                )),
            }
        }

        let eligible = reasons.is_empty();
        let target_phase = if eligible { next } else { None };
        if let Some(target) = &target_phase {
            reasons.push(format!(
                "all criteria met: '{}' may advance to '{}'",
                state.phase, target
            ));
        }

        TransitionVerdict {
            eligible,
            target_phase,
            reasons,
            progress,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
