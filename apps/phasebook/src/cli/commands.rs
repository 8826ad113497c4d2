//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.
//!
//! Every command opens the project afresh, so nothing is cached between
//! invocations. Non-fatal warnings from the engine are emitted as
//! `tracing::warn!` events before the result is printed.

use crate::config::load_config;
use crate::project::{ProjectEngine, ProjectLayout};
use chrono::Utc;
use phasebook_core::{
    Dimension, DocumentStore, EngineError, PriorityTier, SessionInput, TaskStatus,
    TransitionVerdict, Warning,
};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Maximum master document size (1 MB).
const MAX_MASTER_FILE_SIZE: u64 = 1024 * 1024;

// =============================================================================
// COMMAND CONTEXT
// =============================================================================

/// How a command that ran to completion should exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Exit 0.
    Success,
    /// Exit 1: the command ran, but what it checks does not hold
    /// (not eligible, not confirmed, index not clean).
    Unmet,
}

impl CommandStatus {
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Unmet => 1,
        }
    }
}

/// Global options shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    pub layout: ProjectLayout,
    pub config_path: Option<PathBuf>,
    pub json: bool,
}

impl Context {
    #[must_use]
    pub fn new(project: PathBuf, config_path: Option<PathBuf>, json: bool) -> Self {
        Self {
            layout: ProjectLayout::new(project),
            config_path,
            json,
        }
    }

    fn open_engine(&self) -> Result<ProjectEngine, EngineError> {
        let config = match &self.config_path {
            Some(path) => load_config(path, true)?,
            None => load_config(&self.layout.config_path(), false)?,
        };
        self.layout.open_engine(config)
    }
}

// =============================================================================
// OUTPUT HELPERS
// =============================================================================

fn print_json<T: Serialize>(value: &T) -> Result<(), EngineError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| EngineError::Serialization(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

fn report_warnings(warnings: &[Warning]) {
    for warning in warnings {
        tracing::warn!("{}", warning);
    }
}

fn print_verdict(verdict: &TransitionVerdict) {
    let p = &verdict.progress;
    match (&verdict.target_phase, verdict.eligible) {
        (Some(target), true) => println!("Eligible:   yes (next phase: {})", target),
        _ => println!("Eligible:   no"),
    }
    println!(
        "Critical:   {} / {} complete",
        p.critical_complete, p.critical_total
    );
    println!(
        "High:       {} / {} complete ({}%)",
        p.high_complete, p.high_total, p.high_percent
    );
    println!("Blockers:   {}", p.blockers);
    for reason in &verdict.reasons {
        println!("  - {}", reason);
    }
}

/// Read the master document, rejecting anything that is not a reasonably
/// sized regular file.
fn read_master(path: &Path) -> Result<String, EngineError> {
    let canonical = path.canonicalize().map_err(|e| {
        EngineError::Io(format!("Invalid file path '{}': {}", path.display(), e))
    })?;
    let metadata = std::fs::metadata(&canonical)
        .map_err(|e| EngineError::Io(format!("Cannot read file metadata: {}", e)))?;
    if !metadata.is_file() {
        return Err(EngineError::Io(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }
    if metadata.len() > MAX_MASTER_FILE_SIZE {
        return Err(EngineError::InvalidInput(format!(
            "Master document is {} bytes, exceeds maximum allowed {} bytes",
            metadata.len(),
            MAX_MASTER_FILE_SIZE
        )));
    }
    std::fs::read_to_string(&canonical)
        .map_err(|e| EngineError::Io(format!("Read {}: {}", path.display(), e)))
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Create the state record, master document and an empty index.
pub fn cmd_init(
    ctx: &Context,
    master: &Path,
    phase: Option<&str>,
    force: bool,
) -> Result<CommandStatus, EngineError> {
    let text = read_master(master)?;
    ctx.layout.ensure_data_dir()?;
    let mut engine = ctx.open_engine()?;
    let update = engine.initialize(&text, phase, force, Utc::now())?;
    ctx.layout.ensure_index()?;
    report_warnings(&update.warnings);
    tracing::info!("Initialized project at {:?}", ctx.layout.root());

    if ctx.json {
        print_json(&serde_json::json!({
            "project": ctx.layout.root().to_string_lossy(),
            "phase": update.state.phase,
            "warnings": update.warnings,
        }))?;
    } else {
        println!(
            "Initialized phasebook project in {}",
            ctx.layout.root().display()
        );
        println!("Phase: {}", update.state.phase);
    }
    Ok(CommandStatus::Success)
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show phase, tasks, blockers, health and the gate verdict.
pub fn cmd_status(ctx: &Context) -> Result<CommandStatus, EngineError> {
    let engine = ctx.open_engine()?;
    let state = engine.read_state()?;
    let verdict = engine.gate().evaluate(&state);

    if ctx.json {
        print_json(&serde_json::json!({
            "phase": state.phase,
            "entered_at": state.current_entry().map(|e| e.entered_at),
            "tasks": state.tasks,
            "blockers": state.blockers,
            "health_metrics": state.health_metrics,
            "session_count": state.session_history.len(),
            "last_session": state.session_history.last(),
            "verdict": verdict,
        }))?;
        return Ok(CommandStatus::Success);
    }

    println!("Phasebook Status");
    println!("================");
    println!("Project: {}", ctx.layout.root().display());
    match state.current_entry() {
        Some(entry) => println!("Phase:   {} (since {})", state.phase, entry.entered_at),
        None => println!("Phase:   {}", state.phase),
    }
    println!();

    println!("Tasks:");
    for tier in PriorityTier::ALL {
        let tasks = state.tier(tier);
        if tasks.is_empty() {
            continue;
        }
        let done = tasks.iter().filter(|t| t.is_complete()).count();
        println!("  {} ({}/{} complete)", tier, done, tasks.len());
        for task in tasks {
            match &task.module_hint {
                Some(module) => println!("    [{}] {} ({})", task.status, task.description, module),
                None => println!("    [{}] {}", task.status, task.description),
            }
        }
    }
    if state.task_count() == 0 {
        println!("  (none planned)");
    }

    if !state.blockers.is_empty() {
        println!();
        println!("Blockers:");
        for blocker in &state.blockers {
            println!("  - {}", blocker);
        }
    }
    if !state.health_metrics.is_empty() {
        println!();
        println!("Health:");
        for (metric, score) in &state.health_metrics {
            println!("  {:<16} {}", metric, score);
        }
    }

    println!();
    println!("Sessions: {}", state.session_history.len());
    if let Some(last) = state.session_history.last() {
        println!("Last:     {} ({})", last.summary, last.timestamp);
    }
    println!();
    print_verdict(&verdict);
    Ok(CommandStatus::Success)
}

// =============================================================================
// ASSEMBLE COMMAND
// =============================================================================

/// Print the context bundle for the current phase.
pub fn cmd_assemble_context(ctx: &Context) -> Result<CommandStatus, EngineError> {
    let engine = ctx.open_engine()?;
    let index = ctx.layout.load_index()?;
    let assembly = engine.assemble(&index)?;
    report_warnings(&assembly.warnings);

    if ctx.json {
        print_json(&assembly)?;
        return Ok(CommandStatus::Success);
    }

    let bundle = &assembly.bundle;
    println!("=== MASTER ===");
    println!("{}", bundle.master);
    println!("=== PHASE ===");
    println!("{}", bundle.phase);
    for module in &bundle.modules {
        println!("=== MODULE: {} ===", module.id);
        println!("{}", module.body);
    }
    if !bundle.knowledge_refs.is_empty() {
        println!("=== KNOWLEDGE REFERENCES ===");
        for doc in &bundle.knowledge_refs {
            if doc.tags.is_empty() {
                println!("- {}", doc.path);
            } else {
                let tags: Vec<&str> = doc.tags.iter().map(String::as_str).collect();
                println!("- {} [{}]", doc.path, tags.join(", "));
            }
        }
    }
    for doc in &bundle.emergency {
        println!("=== EMERGENCY: {} ===", doc.id);
        println!("{}", doc.body);
    }
    Ok(CommandStatus::Success)
}

// =============================================================================
// SESSION COMMAND
// =============================================================================

/// Record a session's results and report the new verdict.
pub fn cmd_apply_session(
    ctx: &Context,
    input: &SessionInput,
) -> Result<CommandStatus, EngineError> {
    let mut engine = ctx.open_engine()?;
    let outcome = engine.apply_session(input, Utc::now())?;
    report_warnings(&outcome.warnings);
    tracing::info!(
        "Session recorded: {} completed, {} issues",
        outcome.record.tasks_completed.len(),
        outcome.record.issues_raised.len()
    );

    if ctx.json {
        print_json(&outcome)?;
        return Ok(CommandStatus::Success);
    }

    println!("Session recorded: {}", outcome.record.summary);
    println!(
        "  {} task reference(s), {} issue(s), {} warning(s)",
        outcome.record.tasks_completed.len(),
        outcome.record.issues_raised.len(),
        outcome.warnings.len()
    );
    println!();
    print_verdict(&outcome.verdict);
    if outcome.verdict.eligible {
        println!();
        println!("Run `phasebook advance --confirm` to move on.");
    }
    Ok(CommandStatus::Success)
}

// =============================================================================
// TRANSITION COMMANDS
// =============================================================================

/// Evaluate the gate. `Unmet` (exit 1) unless eligible.
pub fn cmd_check_transition(ctx: &Context) -> Result<CommandStatus, EngineError> {
    let engine = ctx.open_engine()?;
    let verdict = engine.evaluate()?;

    if ctx.json {
        print_json(&verdict)?;
    } else {
        print_verdict(&verdict);
    }
    Ok(if verdict.eligible {
        CommandStatus::Success
    } else {
        CommandStatus::Unmet
    })
}

/// Advance to the next phase. Without `confirm`, only shows the proposal.
pub fn cmd_advance(ctx: &Context, confirm: bool) -> Result<CommandStatus, EngineError> {
    let mut engine = ctx.open_engine()?;

    if !confirm {
        let verdict = engine.evaluate()?;
        if ctx.json {
            print_json(&serde_json::json!({
                "confirmed": false,
                "verdict": verdict,
            }))?;
        } else {
            print_verdict(&verdict);
            if let Some(target) = &verdict.target_phase {
                println!();
                println!(
                    "Proposed: {} -> {}. Re-run with --confirm to apply.",
                    engine.read_state()?.phase,
                    target
                );
            }
        }
        return Ok(CommandStatus::Unmet);
    }

    let outcome = engine.advance(Utc::now())?;
    report_warnings(&outcome.warnings);
    tracing::info!("Advanced {} -> {}", outcome.from, outcome.to);

    if ctx.json {
        print_json(&outcome)?;
    } else {
        println!("Advanced: {} -> {}", outcome.from, outcome.to);
    }
    Ok(CommandStatus::Success)
}

/// Return to an earlier phase.
pub fn cmd_rollback(ctx: &Context, to: &str, reason: &str) -> Result<CommandStatus, EngineError> {
    let mut engine = ctx.open_engine()?;
    let outcome = engine.rollback(to, reason, Utc::now())?;
    report_warnings(&outcome.warnings);
    tracing::info!("Rolled back {} -> {}: {}", outcome.from, outcome.to, reason);

    if ctx.json {
        print_json(&outcome)?;
    } else {
        println!("Rolled back: {} -> {}", outcome.from, outcome.to);
        println!("Reason: {}", reason.trim());
    }
    Ok(CommandStatus::Success)
}

// =============================================================================
// TASK COMMANDS
// =============================================================================

pub fn cmd_add_task(
    ctx: &Context,
    tier: &str,
    module: Option<&str>,
    description: &str,
) -> Result<CommandStatus, EngineError> {
    let tier: PriorityTier = tier.parse()?;
    let mut engine = ctx.open_engine()?;
    let update = engine.add_task(tier, description, module, Utc::now())?;
    report_warnings(&update.warnings);

    if ctx.json {
        print_json(&serde_json::json!({
            "tier": tier,
            "description": description.trim(),
            "tasks": update.state.tier(tier),
        }))?;
    } else {
        println!("Planned [{}] {}", tier, description.trim());
    }
    Ok(CommandStatus::Success)
}

pub fn cmd_set_status(
    ctx: &Context,
    task: &str,
    status: &str,
) -> Result<CommandStatus, EngineError> {
    let status: TaskStatus = status.parse()?;
    let mut engine = ctx.open_engine()?;
    let update = engine.set_task_status(task, status, Utc::now())?;
    report_warnings(&update.warnings);

    if ctx.json {
        print_json(&serde_json::json!({
            "task": task.trim(),
            "status": status,
        }))?;
    } else {
        println!("{} -> {}", task.trim(), status);
    }
    Ok(CommandStatus::Success)
}

// =============================================================================
// INDEX COMMANDS
// =============================================================================

/// List the references under `(dimension, key)`, marking unresolved ones.
pub fn cmd_lookup(ctx: &Context, dimension: &str, key: &str) -> Result<CommandStatus, EngineError> {
    let dimension: Dimension = dimension.parse()?;
    let engine = ctx.open_engine()?;
    let index = ctx.layout.load_index()?;
    let refs = index.lookup(dimension, key);

    let mut rows = Vec::with_capacity(refs.len());
    for doc in refs {
        rows.push((doc, engine.store().resolves(&doc.path)?));
    }

    if ctx.json {
        let entries: Vec<serde_json::Value> = rows
            .iter()
            .map(|(doc, resolves)| {
                serde_json::json!({ "path": doc.path, "tags": doc.tags, "resolves": resolves })
            })
            .collect();
        print_json(&serde_json::json!({
            "dimension": dimension,
            "key": key,
            "refs": entries,
        }))?;
        return Ok(CommandStatus::Success);
    }

    if rows.is_empty() {
        println!("No references under {} '{}'", dimension, key);
    }
    for (doc, resolves) in rows {
        let marker = if resolves { "" } else { " (missing)" };
        println!("- {}{}", doc.path, marker);
    }
    Ok(CommandStatus::Success)
}

/// Verify the whole index. `Unmet` (exit 1) if any reference dangles.
pub fn cmd_check_index(ctx: &Context) -> Result<CommandStatus, EngineError> {
    let engine = ctx.open_engine()?;
    let index = ctx.layout.load_index()?;
    let report = engine.verify_index(&index)?;
    report_warnings(&report.warnings);

    if ctx.json {
        print_json(&report)?;
    } else if report.is_clean() {
        println!("Index OK: {} reference(s) checked", report.checked);
    } else {
        println!(
            "Index has {} dangling reference(s) out of {} checked",
            report.warnings.len(),
            report.checked
        );
    }
    Ok(if report.is_clean() {
        CommandStatus::Success
    } else {
        CommandStatus::Unmet
    })
}
