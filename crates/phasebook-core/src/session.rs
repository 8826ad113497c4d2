//! # Session Update Planning
//!
//! Turns a session's results into the next state record.
//!
//! Planning is pure: it works on a copy of the state and returns the copy,
//! the new `SessionRecord`, the modules whose tasks were completed, and every
//! non-fatal condition met along the way. Persisting the plan (documents
//! first, state last, rollback on failure) is `Engine::apply_session`.

use crate::primitives::{MAX_HEALTH_SCORE, MAX_TEXT_LENGTH};
use crate::resolver::ModuleResolver;
use crate::{EngineError, ProjectState, SessionRecord, TaskStatus, Warning};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What the operator reports at the end of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SessionInput {
    pub summary: String,
    /// References to planned tasks, matched by description.
    pub tasks_completed: Vec<String>,
    /// Issues noted during the session. Recorded, not classified.
    pub issues_raised: Vec<String>,
    /// Blocking conditions to add to the blocker set.
    pub new_blockers: Vec<String>,
    /// Blockers that no longer apply.
    pub resolved_blockers: Vec<String>,
    /// Health metric scores to set, 0..=100.
    pub health: BTreeMap<String, u8>,
}

impl SessionInput {
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn completed<I, S>(mut self, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tasks_completed.extend(tasks.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn issues<I, S>(mut self, issues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issues_raised.extend(issues.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn blockers<I, S>(mut self, blockers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.new_blockers.extend(blockers.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn resolved<I, S>(mut self, blockers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resolved_blockers
            .extend(blockers.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn metric(mut self, name: impl Into<String>, score: u8) -> Self {
        self.health.insert(name.into(), score);
        self
    }

    /// Reject malformed input before anything is planned or written.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.summary.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "Session summary must not be empty".into(),
            ));
        }
        let oversized = std::iter::once(&self.summary)
            .chain(&self.tasks_completed)
            .chain(&self.issues_raised)
            .any(|t| t.len() > MAX_TEXT_LENGTH);
        if oversized {
            return Err(EngineError::InvalidInput(format!(
                "Session text exceeds {} bytes",
                MAX_TEXT_LENGTH
            )));
        }
        for blocker in self.new_blockers.iter().chain(&self.resolved_blockers) {
            if blocker.trim().is_empty() {
                return Err(EngineError::InvalidInput(
                    "Blocker identifiers must not be empty".into(),
                ));
            }
        }
        for (metric, score) in &self.health {
            if metric.trim().is_empty() {
                return Err(EngineError::InvalidInput(
                    "Health metric names must not be empty".into(),
                ));
            }
            if *score > MAX_HEALTH_SCORE {
                return Err(EngineError::InvalidInput(format!(
                    "Health metric '{}' must be 0..={}, got {}",
                    metric, MAX_HEALTH_SCORE, score
                )));
            }
        }
        Ok(())
    }
}

/// Completed tasks grouped under the module they resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleCompletion {
    pub module: String,
    pub tasks: Vec<String>,
}

/// The planned result of a session, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPlan {
    pub state: ProjectState,
    pub record: SessionRecord,
    /// Modules in first-completed order.
    pub modules: Vec<ModuleCompletion>,
    pub warnings: Vec<Warning>,
}

impl SessionPlan {
    /// The update-log line written to the phase document.
    #[must_use]
    pub fn phase_log_line(&self) -> String {
        let mut line = format!("Session: {}", self.record.summary.trim());
        if !self.record.tasks_completed.is_empty() {
            line.push_str(&format!(
                " | completed: {}",
                self.record.tasks_completed.join("; ")
            ));
        }
        if !self.record.issues_raised.is_empty() {
            line.push_str(&format!(
                " | issues: {}",
                self.record.issues_raised.join("; ")
            ));
        }
        line
    }
}

/// Plan a session against `state`.
pub fn plan_session(
    state: &ProjectState,
    input: &SessionInput,
    resolver: &ModuleResolver,
    now: DateTime<Utc>,
) -> Result<SessionPlan, EngineError> {
    input.validate()?;

    let mut next = state.clone();
    let mut warnings = Vec::new();
    let mut modules: Vec<ModuleCompletion> = Vec::new();

    for reference in &input.tasks_completed {
        let Some((_, task)) = next.find_task_mut(reference) else {
            warnings.push(Warning::UnmatchedTask {
                description: reference.clone(),
            });
            continue;
        };
        task.status = TaskStatus::Complete;
        if let Some(module) = resolver.resolve(task) {
            let description = task.description.clone();
            match modules.iter_mut().find(|m| m.module == module) {
                Some(entry) if entry.tasks.contains(&description) => {}
                Some(entry) => entry.tasks.push(description),
                None => modules.push(ModuleCompletion {
                    module: module.to_string(),
                    tasks: vec![description],
                }),
            }
        }
    }

    for blocker in &input.resolved_blockers {
        if !next.blockers.remove(blocker.trim()) {
            warnings.push(Warning::UnknownBlocker {
                blocker: blocker.clone(),
            });
        }
    }
    for blocker in &input.new_blockers {
        next.blockers.insert(blocker.trim().to_string());
    }

    for (metric, score) in &input.health {
        next.health_metrics.insert(metric.trim().to_string(), *score);
    }

    let record = SessionRecord {
        timestamp: now,
        summary: input.summary.trim().to_string(),
        tasks_completed: input.tasks_completed.clone(),
        issues_raised: input.issues_raised.clone(),
    };
    next.session_history.push(record.clone());

    Ok(SessionPlan {
        state: next,
        record,
        modules,
        warnings,
    })
}

// =============================================================================
// TESTS
// =============================================================================
