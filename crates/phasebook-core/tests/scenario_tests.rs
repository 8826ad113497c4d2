//! # Scenario Tests
//!
//! End-to-end behaviour of the engine through its public API.
//!
//! ## Groups
//! - Lifecycle: evaluate, apply a session, re-evaluate, advance
//! - Atomicity: injected failures leave state and documents untouched
//! - Assembly: missing documents degrade, never abort
//! - Persistence: file and redb backends behind the same engine

use chrono::{DateTime, TimeZone, Utc};
use phasebook_core::{
    ChangeKind, Changelog, ChangelogEntry, DocTier, DocumentStore, Engine, EngineConfig,
    EngineError, FileChangelog, FileDocumentStore, FileStateBackend, KnowledgeIndex,
    MemoryChangelog, MemoryDocumentStore, MemoryStateBackend, PhaseId, PriorityTier,
    ProjectState, PromptDocument, RedbDocumentStore, SessionInput, StateBackend, TaskStatus,
    Warning,
};
use phasebook_core::record::BackendLock;
use std::cell::Cell;

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("ts")
}

// =============================================================================
// FAULT INJECTION
// =============================================================================

/// Memory store whose `put` fails once armed and after `allow` more writes.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryDocumentStore,
    armed: Cell<bool>,
    allow: Cell<usize>,
}

impl FlakyStore {
    fn fail_after(&self, allowed_writes: usize) {
        self.allow.set(allowed_writes);
        self.armed.set(true);
    }
}

impl DocumentStore for FlakyStore {
    fn get(&self, tier: DocTier, id: &str) -> Result<Option<PromptDocument>, EngineError> {
        self.inner.get(tier, id)
    }

    fn put(&mut self, doc: &PromptDocument) -> Result<(), EngineError> {
        if self.armed.get() {
            if self.allow.get() == 0 {
                return Err(EngineError::Io("injected document failure".into()));
            }
            self.allow.set(self.allow.get() - 1);
        }
        self.inner.put(doc)
    }

    fn restore(
        &mut self,
        tier: DocTier,
        id: &str,
        prior: Option<&PromptDocument>,
    ) -> Result<(), EngineError> {
        self.inner.restore(tier, id, prior)
    }

    fn ids(&self, tier: DocTier) -> Result<Vec<String>, EngineError> {
        self.inner.ids(tier)
    }
}

/// Memory backend whose `store` fails once armed.
#[derive(Default)]
struct FlakyBackend {
    inner: MemoryStateBackend,
    fail_store: Cell<bool>,
}

impl StateBackend for FlakyBackend {
    fn exists(&self) -> Result<bool, EngineError> {
        self.inner.exists()
    }

    fn load(&self) -> Result<ProjectState, EngineError> {
        self.inner.load()
    }

    fn store(&self, state: &ProjectState) -> Result<(), EngineError> {
        if self.fail_store.get() {
            return Err(EngineError::Io("injected state failure".into()));
        }
        self.inner.store(state)
    }

    fn lock(&self) -> Result<BackendLock, EngineError> {
        self.inner.lock()
    }
}

/// Changelog that refuses every append.
struct BrokenChangelog;

impl Changelog for BrokenChangelog {
    fn append(&mut self, _entry: &ChangelogEntry) -> Result<(), EngineError> {
        Err(EngineError::Io("changelog disk full".into()))
    }

    fn entries(&self) -> Result<Vec<ChangelogEntry>, EngineError> {
        Ok(Vec::new())
    }
}

fn snapshot<D: DocumentStore>(store: &D) -> Vec<PromptDocument> {
    let mut docs = Vec::new();
    for tier in DocTier::ALL {
        for id in store.ids(tier).expect("ids") {
            docs.push(store.get(tier, &id).expect("get").expect("doc"));
        }
    }
    docs
}

fn flaky_engine() -> Engine<FlakyBackend, FlakyStore, MemoryChangelog> {
    let mut engine = Engine::new(
        EngineConfig::with_default_keywords(),
        FlakyBackend::default(),
        FlakyStore::default(),
        MemoryChangelog::new(),
    )
    .expect("engine");
    engine
        .initialize("Always write tests.", Some("implementation"), false, ts(0))
        .expect("init");
    engine
        .add_task(PriorityTier::Critical, "Complete database module testing", None, ts(1))
        .expect("task");
    engine
        .add_task(PriorityTier::Critical, "Fix API authentication bug", None, ts(2))
        .expect("task");
    engine
}

// =============================================================================
// LIFECYCLE
// =============================================================================

mod lifecycle {
    use super::*;

    #[test]
    fn implementation_to_testing_scenario() {
        let mut engine = flaky_engine();
        engine
            .set_task_status("Complete database module testing", TaskStatus::InProgress, ts(3))
            .expect("status");

        let verdict = engine.evaluate().expect("evaluate");
        assert!(!verdict.eligible);
        assert_eq!(verdict.target_phase, None);
        assert_eq!(verdict.progress.critical_complete, 0);

        let outcome = engine
            .apply_session(
                &SessionInput::new("Closed out the critical tier").completed([
                    "Complete database module testing",
                    "Fix API authentication bug",
                ]),
                ts(4),
            )
            .expect("session");

        assert!(outcome
            .state
            .tier(PriorityTier::Critical)
            .iter()
            .all(|t| t.status == TaskStatus::Complete));
        assert!(outcome.verdict.eligible);
        assert_eq!(outcome.verdict.target_phase, Some(PhaseId::new("testing")));
        // Reported, not applied.
        assert_eq!(outcome.state.phase, PhaseId::new("implementation"));

        let again = engine.evaluate().expect("evaluate");
        assert!(again.eligible);
        assert_eq!(again.target_phase, Some(PhaseId::new("testing")));

        let advanced = engine.advance(ts(5)).expect("advance");
        assert_eq!(advanced.state.phase, PhaseId::new("testing"));
    }

    #[test]
    fn unmatched_task_is_reported_alongside_success() {
        let mut engine = flaky_engine();
        let outcome = engine
            .apply_session(
                &SessionInput::new("partial").completed(["Fix API authentication bug", "Ship it"]),
                ts(3),
            )
            .expect("session");
        assert_eq!(
            outcome.warnings,
            vec![Warning::UnmatchedTask {
                description: "Ship it".into()
            }]
        );
        assert_eq!(outcome.state.session_history.len(), 1);
    }

    #[test]
    fn blockers_hold_the_gate_until_resolved() {
        let mut engine = flaky_engine();
        let blocked = engine
            .apply_session(
                &SessionInput::new("all done but CI is down")
                    .completed(["Complete database module testing", "Fix API authentication bug"])
                    .blockers(["ci-down"]),
                ts(3),
            )
            .expect("session");
        assert!(!blocked.verdict.eligible);

        let cleared = engine
            .apply_session(&SessionInput::new("CI back").resolved(["ci-down"]), ts(4))
            .expect("session");
        assert!(cleared.verdict.eligible);
    }

    #[test]
    fn changelog_failure_is_a_warning_not_a_rollback() {
        let mut engine = Engine::new(
            EngineConfig::default(),
            MemoryStateBackend::new(),
            MemoryDocumentStore::new(),
            BrokenChangelog,
        )
        .expect("engine");
        let init = engine
            .initialize("rules", None, false, ts(0))
            .expect("init");
        assert!(matches!(
            init.warnings.as_slice(),
            [Warning::ChangelogAppendFailed { .. }]
        ));

        let outcome = engine
            .apply_session(&SessionInput::new("work"), ts(1))
            .expect("session");
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(engine.read_state().expect("state").session_history.len(), 1);
    }
}

// =============================================================================
// ATOMICITY
// =============================================================================

mod atomicity {
    use super::*;

    fn session() -> SessionInput {
        SessionInput::new("session that will fail")
            .completed(["Complete database module testing", "Fix API authentication bug"])
            .issues(["flaky fixture"])
    }

    #[test]
    fn document_failure_rolls_back_earlier_documents() {
        let mut engine = flaky_engine();
        let state_before = engine.read_state().expect("state");
        let docs_before = snapshot(engine.store());

        // Phase document succeeds, first module document fails.
        engine.store().fail_after(1);
        let result = engine.apply_session(&session(), ts(10));

        assert!(matches!(result, Err(EngineError::PartialWrite(_))));
        assert_eq!(engine.read_state().expect("state"), state_before);
        assert_eq!(snapshot(engine.store()), docs_before);
    }

    #[test]
    fn state_failure_rolls_back_all_documents() {
        let mut engine = flaky_engine();
        let state_before = engine.read_state().expect("state");
        let docs_before = snapshot(engine.store());
        let log_before = engine.changelog().entries().expect("log").len();

        engine.record().backend().fail_store.set(true);
        let result = engine.apply_session(&session(), ts(10));

        assert!(matches!(result, Err(EngineError::PartialWrite(_))));
        assert_eq!(engine.read_state().expect("state"), state_before);
        // The module documents this session would have created are gone again.
        assert_eq!(snapshot(engine.store()), docs_before);
        assert_eq!(engine.changelog().entries().expect("log").len(), log_before);
    }

    #[test]
    fn failed_advance_leaves_phase_unchanged() {
        let mut engine = flaky_engine();
        engine
            .apply_session(
                &SessionInput::new("done").completed([
                    "Complete database module testing",
                    "Fix API authentication bug",
                ]),
                ts(3),
            )
            .expect("session");
        let docs_before = snapshot(engine.store());

        engine.record().backend().fail_store.set(true);
        assert!(engine.advance(ts(4)).is_err());
        engine.record().backend().fail_store.set(false);

        assert_eq!(
            engine.read_state().expect("state").phase,
            PhaseId::new("implementation")
        );
        assert_eq!(snapshot(engine.store()), docs_before);
        assert!(engine.advance(ts(5)).is_ok());
    }
}

// =============================================================================
// ASSEMBLY
// =============================================================================

mod assembly {
    use super::*;

    #[test]
    fn missing_database_module_is_not_fatal() {
        let engine = flaky_engine();
        let assembly = engine.assemble(&KnowledgeIndex::new()).expect("assemble");

        assert_eq!(assembly.bundle.master, "Always write tests.");
        assert!(assembly.bundle.modules.is_empty());
        assert!(assembly.warnings.contains(&Warning::MissingModuleDocument {
            module: "database".into()
        }));
    }

    #[test]
    fn assembly_reflects_session_updates() {
        let mut engine = flaky_engine();
        engine
            .apply_session(
                &SessionInput::new("db done").completed(["Complete database module testing"]),
                ts(3),
            )
            .expect("session");

        // The session created the database module document.
        let assembly = engine.assemble(&KnowledgeIndex::new()).expect("assemble");
        let ids: Vec<&str> = assembly.bundle.modules.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["database"]);
    }

    #[test]
    fn missing_master_aborts_assembly() {
        let mut engine = Engine::new(
            EngineConfig::default(),
            MemoryStateBackend::new(),
            MemoryDocumentStore::new(),
            MemoryChangelog::new(),
        )
        .expect("engine");
        engine
            .record()
            .initialize(ProjectState::new(PhaseId::new("planning"), ts(0)), false)
            .expect("bare init");
        assert!(matches!(
            engine.assemble(&KnowledgeIndex::new()),
            Err(EngineError::MissingMasterDocument)
        ));
    }
}

// =============================================================================
// PERSISTENCE
// =============================================================================

mod persistence {
    use super::*;

    #[test]
    fn file_backed_engine_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let open = || {
            Engine::new(
                EngineConfig::with_default_keywords(),
                FileStateBackend::new(dir.path().join("state.json")),
                FileDocumentStore::new(dir.path().join("docs")),
                FileChangelog::new(dir.path().join("changelog.jsonl")),
            )
            .expect("engine")
        };

        let mut engine = open();
        engine
            .initialize("rules", Some("design"), false, ts(0))
            .expect("init");
        engine
            .add_task(PriorityTier::High, "Draft API endpoints", None, ts(1))
            .expect("task");
        engine
            .apply_session(
                &SessionInput::new("drafted").completed(["Draft API endpoints"]),
                ts(2),
            )
            .expect("session");
        drop(engine);

        let reopened = open();
        let state = reopened.read_state().expect("state");
        assert!(state.tier(PriorityTier::High)[0].is_complete());
        assert!(reopened.store().contains(DocTier::Module, "api").expect("ok"));
        let kinds: Vec<ChangeKind> = reopened
            .changelog()
            .entries()
            .expect("log")
            .iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(kinds, [ChangeKind::Init, ChangeKind::Task, ChangeKind::Session]);
    }

    #[test]
    fn redb_document_store_behind_engine() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = RedbDocumentStore::open(dir.path().join("docs.redb")).expect("open");
        let mut engine = Engine::new(
            EngineConfig::with_default_keywords(),
            MemoryStateBackend::new(),
            store,
            MemoryChangelog::new(),
        )
        .expect("engine");
        engine
            .initialize("rules", Some("testing"), false, ts(0))
            .expect("init");

        let assembly = engine.assemble(&KnowledgeIndex::new()).expect("assemble");
        assert_eq!(assembly.bundle.master, "rules");
        assert_eq!(assembly.bundle.phase, "");
    }

    #[test]
    fn forced_reinit_waits_for_the_lock_before_touching_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileStateBackend::new(dir.path().join("state.json"));
        let mut engine = Engine::new(
            EngineConfig::with_default_keywords(),
            backend.clone(),
            FileDocumentStore::new(dir.path().join("docs")),
            MemoryChangelog::new(),
        )
        .expect("engine");
        engine
            .initialize("rules", Some("design"), false, ts(0))
            .expect("init");
        let documents = snapshot(engine.store());

        let _foreign = BackendLock::acquire_file(backend.lock_path()).expect("lock");
        let result = engine.initialize("new rules", None, true, ts(1));

        assert!(matches!(result, Err(EngineError::LockHeld(_))));
        assert_eq!(snapshot(engine.store()), documents);
        assert!(!engine.store().contains(DocTier::Phase, "planning").expect("ok"));
        assert_eq!(
            engine.read_state().expect("state").phase,
            PhaseId::new("design")
        );
    }

    #[test]
    fn hand_edited_corrupt_state_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{"format_version":1,"state":{"phase":"launch","phase_history":[]}}"#,
        )
        .expect("write");

        let engine = Engine::new(
            EngineConfig::default(),
            FileStateBackend::new(&path),
            MemoryDocumentStore::new(),
            MemoryChangelog::new(),
        )
        .expect("engine");
        assert!(matches!(
            engine.read_state(),
            Err(EngineError::StateCorruption(_))
        ));
    }
}
