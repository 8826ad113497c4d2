//! End-to-end tests driving the CLI commands against a temporary project.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use phasebook::cli::{
    CommandStatus, Context, cmd_add_task, cmd_advance, cmd_apply_session, cmd_assemble_context,
    cmd_check_index, cmd_check_transition, cmd_init, cmd_lookup, cmd_rollback, cmd_set_status,
    cmd_status,
};
use phasebook::config::load_config;
use phasebook::project::ProjectLayout;
use phasebook_core::{
    DocTier, DocumentStore, EngineError, PhaseId, PriorityTier, ProjectState, SessionInput,
    TaskStatus,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// =============================================================================
// HELPERS
// =============================================================================

fn project() -> (TempDir, Context, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let master = dir.path().join("MASTER.md");
    std::fs::write(&master, "# Project\nBuild a small web service.\n").unwrap();
    let ctx = Context::new(dir.path().to_path_buf(), None, false);
    (dir, ctx, master)
}

fn state_of(root: &Path) -> ProjectState {
    let layout = ProjectLayout::new(root);
    let config = load_config(&layout.config_path(), false).unwrap();
    layout.open_engine(config).unwrap().read_state().unwrap()
}

// =============================================================================
// INIT
// =============================================================================

#[test]
fn test_init_creates_layout() {
    let (dir, ctx, master) = project();

    let status = cmd_init(&ctx, &master, None, false).unwrap();
    assert_eq!(status, CommandStatus::Success);

    let layout = ProjectLayout::new(dir.path());
    assert!(layout.state_path().exists());
    assert!(layout.index_path().exists());
    assert!(layout.changelog_path().exists());
    assert!(!layout.state_path().with_extension("json.lock").exists());

    let state = state_of(dir.path());
    assert_eq!(state.phase, PhaseId::new("planning"));
    assert_eq!(state.phase_history.len(), 1);
}

#[test]
fn test_init_twice_requires_force() {
    let (_dir, ctx, master) = project();
    cmd_init(&ctx, &master, None, false).unwrap();

    let again = cmd_init(&ctx, &master, Some("design"), false);
    assert!(matches!(again, Err(EngineError::InvalidInput(_))));

    assert_eq!(
        cmd_init(&ctx, &master, Some("design"), true).unwrap(),
        CommandStatus::Success
    );
}

#[test]
fn test_init_rejects_missing_master_and_unknown_phase() {
    let (dir, ctx, master) = project();

    let missing = cmd_init(&ctx, &dir.path().join("nope.md"), None, false);
    assert!(matches!(missing, Err(EngineError::Io(_))));

    let unknown = cmd_init(&ctx, &master, Some("celebration"), false);
    assert!(matches!(unknown, Err(EngineError::UnknownPhase(_))));
}

#[test]
fn test_commands_before_init_fail() {
    let (dir, ctx, _master) = project();
    assert!(matches!(
        cmd_status(&ctx),
        Err(EngineError::NotInitialized(_))
    ));
    assert!(matches!(
        cmd_assemble_context(&ctx),
        Err(EngineError::NotInitialized(_))
    ));
    assert!(matches!(
        cmd_check_index(&ctx),
        Err(EngineError::NotInitialized(_))
    ));

    // Read-only commands leave no trace in an uninitialized project
    assert!(!ProjectLayout::new(dir.path()).data_dir().exists());
}

// =============================================================================
// LIFECYCLE
// =============================================================================

#[test]
fn test_full_phase_cycle() {
    let (dir, ctx, master) = project();
    cmd_init(&ctx, &master, None, false).unwrap();

    cmd_add_task(&ctx, "critical", None, "Implement database module").unwrap();
    cmd_add_task(&ctx, "high", Some("auth"), "Fix API authentication bug").unwrap();
    assert_eq!(cmd_check_transition(&ctx).unwrap(), CommandStatus::Unmet);

    let input = SessionInput::new("Schema and auth done").completed([
        "Implement database module",
        "fix api authentication bug",
    ]);
    assert_eq!(
        cmd_apply_session(&ctx, &input).unwrap(),
        CommandStatus::Success
    );
    assert_eq!(cmd_check_transition(&ctx).unwrap(), CommandStatus::Success);

    // Without confirmation nothing moves.
    assert_eq!(cmd_advance(&ctx, false).unwrap(), CommandStatus::Unmet);
    assert_eq!(state_of(dir.path()).phase, PhaseId::new("planning"));

    assert_eq!(cmd_advance(&ctx, true).unwrap(), CommandStatus::Success);
    let state = state_of(dir.path());
    assert_eq!(state.phase, PhaseId::new("design"));
    assert_eq!(state.task_count(), 0);
    assert_eq!(state.session_history.len(), 1);

    cmd_rollback(&ctx, "planning", "scope changed").unwrap();
    let state = state_of(dir.path());
    assert_eq!(state.phase, PhaseId::new("planning"));
    assert!(state.phase_history[2].transition.is_rollback());
}

#[test]
fn test_module_documents_follow_sessions() {
    let (dir, ctx, master) = project();
    cmd_init(&ctx, &master, None, false).unwrap();
    cmd_add_task(&ctx, "critical", None, "Implement database module").unwrap();

    let input = SessionInput::new("Database work").completed(["Implement database module"]);
    cmd_apply_session(&ctx, &input).unwrap();

    let layout = ProjectLayout::new(dir.path());
    let config = load_config(&layout.config_path(), false).unwrap();
    let engine = layout.open_engine(config).unwrap();
    let doc = engine
        .store()
        .get(DocTier::Module, "database")
        .unwrap()
        .unwrap();
    assert!(!doc.update_log.is_empty());

    let phase = engine
        .store()
        .get(DocTier::Phase, "planning")
        .unwrap()
        .unwrap();
    assert!(phase.update_log.iter().any(|e| e.change_description.contains("Database work")));
}

#[test]
fn test_blocked_advance_is_error() {
    let (_dir, ctx, master) = project();
    cmd_init(&ctx, &master, None, false).unwrap();
    cmd_add_task(&ctx, "critical", None, "Write the plan").unwrap();

    let result = cmd_advance(&ctx, true);
    assert!(matches!(result, Err(EngineError::TransitionRejected(_))));
}

#[test]
fn test_set_status_and_bad_inputs() {
    let (dir, ctx, master) = project();
    cmd_init(&ctx, &master, None, false).unwrap();
    cmd_add_task(&ctx, "medium", None, "Draft the roadmap").unwrap();

    cmd_set_status(&ctx, "draft the roadmap", "in_progress").unwrap();
    let state = state_of(dir.path());
    assert_eq!(
        state.tier(PriorityTier::Medium)[0].status,
        TaskStatus::InProgress
    );

    assert!(matches!(
        cmd_set_status(&ctx, "Draft the roadmap", "finished"),
        Err(EngineError::InvalidInput(_))
    ));
    assert!(matches!(
        cmd_add_task(&ctx, "urgent", None, "Anything"),
        Err(EngineError::InvalidInput(_))
    ));
    assert!(matches!(
        cmd_rollback(&ctx, "planning", "nowhere to go"),
        Err(EngineError::InvalidInput(_)) | Err(EngineError::TransitionRejected(_))
    ));
}

// =============================================================================
// INDEX
// =============================================================================

#[test]
fn test_check_index_reports_dangling_references() {
    let (dir, ctx, master) = project();
    cmd_init(&ctx, &master, None, false).unwrap();
    assert_eq!(cmd_check_index(&ctx).unwrap(), CommandStatus::Success);

    let layout = ProjectLayout::new(dir.path());
    std::fs::write(
        layout.index_path(),
        r#"{
            "index_by_phase": {"planning": ["phase/planning", "module/roadmap"]},
            "index_by_keyword": {"plan": [{"path": "master/master", "tags": ["core"]}]}
        }"#,
    )
    .unwrap();

    assert_eq!(cmd_check_index(&ctx).unwrap(), CommandStatus::Unmet);
    assert_eq!(
        cmd_lookup(&ctx, "keyword", "plan").unwrap(),
        CommandStatus::Success
    );
    assert!(matches!(
        cmd_lookup(&ctx, "tag", "plan"),
        Err(EngineError::InvalidInput(_))
    ));

    // Dangling references only warn during assembly.
    assert_eq!(cmd_assemble_context(&ctx).unwrap(), CommandStatus::Success);
}

#[test]
fn test_malformed_index_is_error() {
    let (dir, ctx, master) = project();
    cmd_init(&ctx, &master, None, false).unwrap();
    std::fs::write(ProjectLayout::new(dir.path()).index_path(), "{ not json").unwrap();

    assert!(matches!(
        cmd_assemble_context(&ctx),
        Err(EngineError::Serialization(_))
    ));
}

// =============================================================================
// CONFIGURATION
// =============================================================================

#[test]
fn test_project_config_changes_phase_order() {
    let (dir, ctx, master) = project();
    std::fs::write(
        dir.path().join("phasebook.toml"),
        "[phases]\norder = [\"draft\", \"review\", \"publish\"]\n",
    )
    .unwrap();

    cmd_init(&ctx, &master, None, false).unwrap();
    assert_eq!(state_of(dir.path()).phase, PhaseId::new("draft"));
}

#[test]
fn test_explicit_config_must_exist() {
    let (dir, _ctx, master) = project();
    let ctx = Context::new(
        dir.path().to_path_buf(),
        Some(dir.path().join("missing.toml")),
        false,
    );
    assert!(matches!(
        cmd_init(&ctx, &master, None, false),
        Err(EngineError::Config(_))
    ));
}

#[test]
fn test_redb_document_backend() {
    let (dir, ctx, master) = project();
    std::fs::write(
        dir.path().join("phasebook.toml"),
        "[storage]\ndocuments = \"redb\"\n",
    )
    .unwrap();

    cmd_init(&ctx, &master, None, false).unwrap();
    cmd_add_task(&ctx, "critical", None, "Design the schema").unwrap();
    let input = SessionInput::new("Schema drafted").completed(["Design the schema"]);
    cmd_apply_session(&ctx, &input).unwrap();
    assert_eq!(cmd_assemble_context(&ctx).unwrap(), CommandStatus::Success);

    let layout = ProjectLayout::new(dir.path());
    assert!(layout.documents_db().exists());
    assert!(!layout.documents_dir().exists());
}

#[test]
fn test_json_output_mode() {
    let (dir, _ctx, master) = project();
    let ctx = Context::new(dir.path().to_path_buf(), None, true);

    cmd_init(&ctx, &master, None, false).unwrap();
    assert_eq!(cmd_status(&ctx).unwrap(), CommandStatus::Success);
    assert_eq!(cmd_check_transition(&ctx).unwrap(), CommandStatus::Success);
    assert_eq!(cmd_check_index(&ctx).unwrap(), CommandStatus::Success);
}
