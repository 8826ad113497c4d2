//! # Engine
//!
//! The operations a project runs through: initialise, assemble, apply a
//! session, advance, roll back, and plan tasks.
//!
//! ## Write Discipline
//!
//! Every mutating operation runs inside one [`StateRecord::transaction`], so
//! the state lock is held from the first read to the last write. Inside it:
//!
//! 1. The next state is planned and validated. Nothing is written yet.
//! 2. Document writes are applied, each prior version journaled.
//! 3. The state record is written last.
//!
//! If step 2 or 3 fails, the journal restores every touched document and the
//! operation fails with `PartialWrite`. The changelog is appended only after
//! the state commit; a failure there is reported as a warning.

use crate::assembler::{Assembly, ContextAssembler, MASTER_DOCUMENT_ID};
use crate::changelog::{ChangeKind, Changelog};
use crate::config::EngineConfig;
use crate::index::{IndexReport, KnowledgeIndex};
use crate::primitives::MAX_TEXT_LENGTH;
use crate::record::{StateBackend, StateRecord, Transaction};
use crate::resolver::ModuleResolver;
use crate::session::{SessionInput, SessionPlan, plan_session};
use crate::store::DocumentStore;
use crate::system::{PhaseGate, TransitionVerdict};
use crate::{
    DocTier, EngineError, PhaseId, PriorityTier, ProjectState, PromptDocument, SessionRecord,
    TaskRef, TaskStatus, TransitionKind, Warning,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;

// =============================================================================
// OUTCOMES
// =============================================================================

/// Result of `apply_session`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionOutcome {
    pub state: ProjectState,
    pub record: SessionRecord,
    /// Re-evaluated against the committed state. Never acted on automatically.
    pub verdict: TransitionVerdict,
    pub warnings: Vec<Warning>,
}

/// Result of `advance` and `rollback`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionOutcome {
    pub state: ProjectState,
    pub from: PhaseId,
    pub to: PhaseId,
    pub warnings: Vec<Warning>,
}

/// Result of operations that only change the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateUpdate {
    pub state: ProjectState,
    pub warnings: Vec<Warning>,
}

// =============================================================================
// DOCUMENT JOURNAL
// =============================================================================

/// Prior versions of the documents an in-flight operation has written.
struct DocumentJournal {
    priors: Vec<(DocTier, String, Option<PromptDocument>)>,
}

impl DocumentJournal {
    /// Write `docs` in order. On failure, everything written so far is restored.
    fn write_all<D: DocumentStore>(
        store: &mut D,
        docs: &[PromptDocument],
    ) -> Result<Self, EngineError> {
        let mut priors = Vec::with_capacity(docs.len());
        for doc in docs {
            priors.push((doc.tier, doc.id.clone(), store.get(doc.tier, &doc.id)?));
        }

        let mut journal = Self {
            priors: Vec::with_capacity(docs.len()),
        };
        for (doc, prior) in docs.iter().zip(priors) {
            // Journal before writing: a failed put may have half-applied.
            journal.priors.push(prior);
            if let Err(e) = store.put(doc) {
                return Err(journal.roll_back(store, format!("writing {}: {}", doc.path(), e)));
            }
        }
        Ok(journal)
    }

    /// Restore every journaled document and build the error to surface.
    fn roll_back<D: DocumentStore>(self, store: &mut D, cause: String) -> EngineError {
        let mut failures = Vec::new();
        for (tier, id, prior) in self.priors.iter().rev() {
            if let Err(e) = store.restore(*tier, id, prior.as_ref()) {
                failures.push(format!("{}/{}: {}", tier, id, e));
            }
        }
        if failures.is_empty() {
            EngineError::PartialWrite(format!(
                "{}; {} document write(s) rolled back",
                cause,
                self.priors.len()
            ))
        } else {
            EngineError::PartialWrite(format!(
                "{}; rollback incomplete: {}",
                cause,
                failures.join("; ")
            ))
        }
    }
}

/// Validate `next`, write `docs`, then commit `next`. Documents are restored
/// if the commit fails.
fn commit_with_documents<B: StateBackend, D: DocumentStore>(
    tx: &mut Transaction<'_, B>,
    store: &mut D,
    next: ProjectState,
    docs: &[PromptDocument],
) -> Result<(), EngineError> {
    next.validate(tx.phases())?;
    next.check_succession(tx.state())?;
    let journal = DocumentJournal::write_all(store, docs)?;
    if let Err(e) = tx.commit(next) {
        return Err(journal.roll_back(store, format!("state commit failed: {}", e)));
    }
    Ok(())
}

/// Fetch a document, or a fresh placeholder logged as created at `now`.
fn load_or_create<D: DocumentStore>(
    store: &D,
    tier: DocTier,
    id: &str,
    now: DateTime<Utc>,
) -> Result<PromptDocument, EngineError> {
    if let Some(doc) = store.get(tier, id)? {
        return Ok(doc);
    }
    let mut doc = PromptDocument::placeholder(tier, id);
    doc.amend(now, "created");
    Ok(doc)
}

fn session_documents<D: DocumentStore>(
    store: &D,
    plan: &SessionPlan,
    now: DateTime<Utc>,
) -> Result<Vec<PromptDocument>, EngineError> {
    let mut docs = Vec::with_capacity(plan.modules.len().saturating_add(1));
    let mut phase_doc = load_or_create(store, DocTier::Phase, plan.state.phase.as_str(), now)?;
    phase_doc.amend(now, plan.phase_log_line());
    docs.push(phase_doc);

    for completion in &plan.modules {
        let mut doc = load_or_create(store, DocTier::Module, &completion.module, now)?;
        doc.amend(now, format!("Completed: {}", completion.tasks.join("; ")));
        docs.push(doc);
    }
    Ok(docs)
}

fn validate_task_text(description: &str) -> Result<(), EngineError> {
    if description.trim().is_empty() {
        return Err(EngineError::InvalidInput(
            "Task description must not be empty".into(),
        ));
    }
    if description.len() > MAX_TEXT_LENGTH {
        return Err(EngineError::InvalidInput(format!(
            "Task description exceeds {} bytes",
            MAX_TEXT_LENGTH
        )));
    }
    Ok(())
}

fn record_change<C: Changelog>(
    changelog: &mut C,
    now: DateTime<Utc>,
    kind: ChangeKind,
    summary: String,
    details: Vec<String>,
    warnings: &mut Vec<Warning>,
) {
    if let Err(e) = changelog.record(now, kind, summary, details) {
        warnings.push(Warning::ChangelogAppendFailed {
            reason: e.to_string(),
        });
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// A project: configuration, state record, document store and changelog.
#[derive(Debug)]
pub struct Engine<S: StateBackend, D: DocumentStore, C: Changelog> {
    config: EngineConfig,
    record: StateRecord<S>,
    store: D,
    changelog: C,
}

impl<S: StateBackend, D: DocumentStore, C: Changelog> Engine<S, D, C> {
    /// Create an engine. Fails if the configuration is invalid.
    pub fn new(config: EngineConfig, backend: S, store: D, changelog: C) -> Result<Self, EngineError> {
        config.validate()?;
        let record = StateRecord::new(backend, config.phases.clone());
        Ok(Self {
            config,
            record,
            store,
            changelog,
        })
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn record(&self) -> &StateRecord<S> {
        &self.record
    }

    #[must_use]
    pub fn store(&self) -> &D {
        &self.store
    }

    #[must_use]
    pub fn changelog(&self) -> &C {
        &self.changelog
    }

    #[must_use]
    pub fn gate(&self) -> PhaseGate<'_> {
        PhaseGate::new(&self.config.phases, &self.config.transition)
    }

    // =========================================================================
    // READ OPERATIONS (no lock)
    // =========================================================================

    pub fn read_state(&self) -> Result<ProjectState, EngineError> {
        self.record.read()
    }

    /// Evaluate the current record. Reports only; never transitions.
    pub fn evaluate(&self) -> Result<TransitionVerdict, EngineError> {
        let state = self.read_state()?;
        Ok(self.gate().evaluate(&state))
    }

    /// Assemble the context bundle for the current record.
    pub fn assemble(&self, index: &KnowledgeIndex) -> Result<Assembly, EngineError> {
        let state = self.read_state()?;
        ContextAssembler::new(&self.config).assemble(&state, index, &self.store)
    }

    /// Check every index reference against the document store.
    pub fn verify_index(&self, index: &KnowledgeIndex) -> Result<IndexReport, EngineError> {
        index.verify(&self.store)
    }

    // =========================================================================
    // WRITE OPERATIONS
    // =========================================================================

    /// Create the state record and the master document.
    ///
    /// Starts in `phase`, or the first configured phase. With `force`, an
    /// existing record is replaced and an existing master is revised.
    pub fn initialize(
        &mut self,
        master: &str,
        phase: Option<&str>,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<StateUpdate, EngineError> {
        if master.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "Master document must not be empty".into(),
            ));
        }
        let phase = match phase {
            Some(name) => self.config.phases.require(name)?,
            None => self
                .config
                .phases
                .first()
                .cloned()
                .ok_or_else(|| EngineError::Config("phases.order is empty".into()))?,
        };
        let state = ProjectState::new(phase.clone(), now);
        state.validate(&self.config.phases)?;
        let store = &mut self.store;

        // Documents are read and written only once the lock is held.
        self.record.initialize_with(force, |init| {
            let mut docs = Vec::with_capacity(2);
            match store.get(DocTier::Master, MASTER_DOCUMENT_ID)? {
                Some(mut doc) if doc.body != master => {
                    doc.revise(master, now, "master replaced at initialization");
                    docs.push(doc);
                }
                Some(_) => {}
                None => {
                    let mut doc =
                        PromptDocument::new(DocTier::Master, MASTER_DOCUMENT_ID, master);
                    doc.amend(now, "created");
                    docs.push(doc);
                }
            }
            if !store.contains(DocTier::Phase, phase.as_str())? {
                docs.push(load_or_create(store, DocTier::Phase, phase.as_str(), now)?);
            }

            let journal = DocumentJournal::write_all(store, &docs)?;
            if let Err(e) = init.store(&state) {
                return Err(journal.roll_back(store, format!("initialization failed: {}", e)));
            }
            Ok(())
        })?;

        let mut warnings = Vec::new();
        record_change(
            &mut self.changelog,
            now,
            ChangeKind::Init,
            format!("initialized in phase '{}'", phase),
            Vec::new(),
            &mut warnings,
        );
        Ok(StateUpdate { state, warnings })
    }

    /// Apply a session's results: tasks, blockers, health, session history,
    /// and the phase and module document logs, all or nothing.
    pub fn apply_session(
        &mut self,
        input: &SessionInput,
        now: DateTime<Utc>,
    ) -> Result<SessionOutcome, EngineError> {
        let resolver = ModuleResolver::new(&self.config.keywords);
        let store = &mut self.store;

        let plan = self.record.transaction(|tx| {
            let plan = plan_session(tx.state(), input, &resolver, now)?;
            let docs = session_documents(store, &plan, now)?;
            commit_with_documents(tx, store, plan.state.clone(), &docs)?;
            Ok(plan)
        })?;

        let verdict = PhaseGate::new(&self.config.phases, &self.config.transition)
            .evaluate(&plan.state);
        let mut warnings = plan.warnings;
        record_change(
            &mut self.changelog,
            now,
            ChangeKind::Session,
            plan.record.summary.clone(),
            plan.record
                .tasks_completed
                .iter()
                .map(|t| format!("completed: {}", t))
                .chain(plan.record.issues_raised.iter().map(|i| format!("issue: {}", i)))
                .collect(),
            &mut warnings,
        );

        Ok(SessionOutcome {
            state: plan.state,
            record: plan.record,
            verdict,
            warnings,
        })
    }

    /// Move to the next phase. Re-evaluates under the lock and fails with
    /// `TransitionRejected` unless the gate approves.
    ///
    /// The finished phase's task lists are retired to the changelog.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Result<TransitionOutcome, EngineError> {
        let gate = PhaseGate::new(&self.config.phases, &self.config.transition);
        let store = &mut self.store;

        let (from, to, retired, state) = self.record.transaction(|tx| {
            let verdict = gate.evaluate(tx.state());
            let target = match verdict.target_phase {
                Some(target) if verdict.eligible => target,
                _ => return Err(EngineError::TransitionRejected(verdict.reasons)),
            };
            let from = tx.state().phase.clone();

            let mut next = tx.state().clone();
            let retired: Vec<String> = next
                .tasks
                .iter()
                .flat_map(|(tier, tasks)| {
                    tasks
                        .iter()
                        .map(move |t| format!("[{}] {} ({})", tier, t.description, t.status))
                })
                .collect();
            next.tasks.clear();
            next.enter_phase(target.clone(), TransitionKind::Advance, now);

            let mut docs = Vec::with_capacity(2);
            if let Some(mut old) = store.get(DocTier::Phase, from.as_str())? {
                old.amend(now, format!("Phase exited: advanced to '{}'", target));
                docs.push(old);
            }
            let mut entered = load_or_create(store, DocTier::Phase, target.as_str(), now)?;
            entered.amend(now, format!("Phase entered from '{}'", from));
            docs.push(entered);

            commit_with_documents(tx, store, next, &docs)?;
            Ok((from, target, retired, tx.state().clone()))
        })?;

        let mut warnings = Vec::new();
        record_change(
            &mut self.changelog,
            now,
            ChangeKind::Advance,
            format!("{} -> {}", from, to),
            retired,
            &mut warnings,
        );
        Ok(TransitionOutcome {
            state,
            from,
            to,
            warnings,
        })
    }

    /// Return to an earlier phase, recording why.
    ///
    /// Task lists are kept: the work that prompted the rollback continues.
    pub fn rollback(
        &mut self,
        target: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, EngineError> {
        let target = self.config.phases.require(target)?;
        let reason = reason.trim().to_string();
        if reason.is_empty() {
            return Err(EngineError::InvalidInput(
                "Rollback requires a reason".into(),
            ));
        }
        let phases = &self.config.phases;
        let store = &mut self.store;

        let (from, state) = self.record.transaction(|tx| {
            let from = tx.state().phase.clone();
            if phases.compare(&target, &from) != Some(Ordering::Less) {
                return Err(EngineError::InvalidInput(format!(
                    "Rollback target '{}' must precede the current phase '{}'",
                    target, from
                )));
            }

            let mut next = tx.state().clone();
            next.enter_phase(
                target.clone(),
                TransitionKind::Rollback {
                    reason: reason.clone(),
                },
                now,
            );

            let mut doc = load_or_create(store, DocTier::Phase, target.as_str(), now)?;
            doc.amend(
                now,
                format!("Phase re-entered by rollback from '{}': {}", from, reason),
            );

            commit_with_documents(tx, store, next, &[doc])?;
            Ok((from, tx.state().clone()))
        })?;

        let mut warnings = Vec::new();
        record_change(
            &mut self.changelog,
            now,
            ChangeKind::Rollback,
            format!("{} -> {}", from, target),
            vec![format!("reason: {}", reason)],
            &mut warnings,
        );
        Ok(TransitionOutcome {
            state,
            from,
            to: target,
            warnings,
        })
    }

    /// Plan a new task in the current phase.
    ///
    /// Descriptions must be unique across tiers so session references stay
    /// unambiguous.
    pub fn add_task(
        &mut self,
        tier: PriorityTier,
        description: &str,
        module_hint: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<StateUpdate, EngineError> {
        validate_task_text(description)?;
        if let Some(module) = module_hint {
            crate::types::validate_document_id(module.trim())?;
        }
        let mut task = TaskRef::new(description.trim());
        if let Some(module) = module_hint {
            task = task.with_module(module.trim());
        }

        let state = self.record.transaction(|tx| {
            if tx.state().tasks.values().flatten().any(|t| t.matches(description)) {
                return Err(EngineError::InvalidInput(format!(
                    "A task named '{}' is already planned",
                    description.trim()
                )));
            }
            let mut next = tx.state().clone();
            next.push_task(tier, task.clone());
            tx.commit(next)?;
            Ok(tx.state().clone())
        })?;

        let mut warnings = Vec::new();
        record_change(
            &mut self.changelog,
            now,
            ChangeKind::Task,
            format!("planned [{}] {}", tier, task.description),
            Vec::new(),
            &mut warnings,
        );
        Ok(StateUpdate { state, warnings })
    }

    /// Change the status of the task `reference` names.
    pub fn set_task_status(
        &mut self,
        reference: &str,
        status: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<StateUpdate, EngineError> {
        let (tier, description, state) = self.record.transaction(|tx| {
            let mut next = tx.state().clone();
            let (tier, task) = next.find_task_mut(reference).ok_or_else(|| {
                EngineError::InvalidInput(format!("No planned task matches '{}'", reference))
            })?;
            task.status = status;
            let description = task.description.clone();
            tx.commit(next)?;
            Ok((tier, description, tx.state().clone()))
        })?;

        let mut warnings = Vec::new();
        record_change(
            &mut self.changelog,
            now,
            ChangeKind::Task,
            format!("[{}] {} -> {}", tier, description, status),
            Vec::new(),
            &mut warnings,
        );
        Ok(StateUpdate { state, warnings })
    }
}

// =============================================================================
// TESTS
// =============================================================================
