//! # Phasebook CLI Module
//!
//! This module implements the CLI interface for phasebook.
//!
//! ## Available Commands
//!
//! - `init` - Create the state record and master document
//! - `status` - Show phase, tasks, blockers and health
//! - `assemble-context` - Print the context bundle for the next session
//! - `apply-session` - Record a session's results
//! - `check-transition` - Evaluate the phase gate (exit 0 if eligible, else 1)
//! - `advance` - Move to the next phase (requires `--confirm`)
//! - `rollback` - Return to an earlier phase with a reason
//! - `add-task` / `set-status` - Plan tasks and change their status
//! - `lookup` - Query the knowledge index
//! - `check-index` - Report dangling index references

mod commands;

use clap::{Parser, Subcommand};
use phasebook_core::EngineError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Phasebook - phase-aware context assembly
///
/// Keeps a project's layered instruction documents consistent with a single
/// state record, one working session at a time.
#[derive(Parser, Debug)]
#[command(name = "phasebook")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project root directory
    #[arg(short = 'C', long, global = true, default_value = ".")]
    pub project: PathBuf,

    /// Configuration file (default: <project>/phasebook.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a project from a master document
    Init {
        /// Path to the master document text
        #[arg(short, long)]
        master: PathBuf,

        /// Starting phase (default: first configured phase)
        #[arg(short, long)]
        phase: Option<String>,

        /// Replace an existing state record
        #[arg(short, long)]
        force: bool,
    },

    /// Show project status
    Status,

    /// Print the context bundle for the current phase
    AssembleContext,

    /// Record the results of a working session
    ApplySession {
        /// One-line session summary
        #[arg(short, long)]
        summary: String,

        /// Completed task descriptions
        #[arg(long = "completed", num_args = 1..)]
        completed: Vec<String>,

        /// Issues raised during the session
        #[arg(long = "issue", visible_alias = "issues", num_args = 1..)]
        issues: Vec<String>,

        /// Blocking conditions to record
        #[arg(long = "blocker", num_args = 1..)]
        blockers: Vec<String>,

        /// Blockers that are resolved
        #[arg(long = "resolved", num_args = 1..)]
        resolved: Vec<String>,

        /// Health metric as name=score (0-100)
        #[arg(long = "metric", value_parser = parse_metric)]
        metrics: Vec<(String, u8)>,
    },

    /// Evaluate whether the current phase may be left
    CheckTransition,

    /// Advance to the next phase
    Advance {
        /// Confirm the transition (without it, only the proposal is shown)
        #[arg(long)]
        confirm: bool,
    },

    /// Return to an earlier phase
    Rollback {
        /// Target phase
        #[arg(long)]
        to: String,

        /// Why the rollback is needed
        #[arg(long)]
        reason: String,
    },

    /// Plan a task in the current phase
    AddTask {
        /// Priority tier (critical, high, medium, low)
        #[arg(short, long)]
        tier: String,

        /// Module the task belongs to
        #[arg(short, long)]
        module: Option<String>,

        /// Task description
        description: String,
    },

    /// Change a task's status
    SetStatus {
        /// New status (not_started, in_progress, blocked, complete)
        #[arg(short, long)]
        status: String,

        /// Task description
        task: String,
    },

    /// Look up documents in the knowledge index
    Lookup {
        /// Dimension (phase, module, keyword)
        #[arg(short, long)]
        dimension: String,

        /// Key to look up
        key: String,
    },

    /// Verify every knowledge index reference
    CheckIndex,
}

/// Parse `name=score`.
fn parse_metric(s: &str) -> Result<(String, u8), String> {
    let (name, score) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=score, got '{}'", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("metric name must not be empty".to_string());
    }
    let score: u8 = score
        .trim()
        .parse()
        .map_err(|_| format!("score for '{}' must be 0-100", name))?;
    if score > 100 {
        return Err(format!("score for '{}' must be 0-100", name));
    }
    Ok((name.to_string(), score))
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<CommandStatus, EngineError> {
    let ctx = Context::new(cli.project, cli.config, cli.json);

    match cli.command {
        Some(Commands::Init {
            master,
            phase,
            force,
        }) => cmd_init(&ctx, &master, phase.as_deref(), force),
        Some(Commands::Status) | None => cmd_status(&ctx),
        Some(Commands::AssembleContext) => cmd_assemble_context(&ctx),
        Some(Commands::ApplySession {
            summary,
            completed,
            issues,
            blockers,
            resolved,
            metrics,
        }) => {
            let mut input = phasebook_core::SessionInput::new(summary)
                .completed(completed)
                .issues(issues)
                .blockers(blockers)
                .resolved(resolved);
            for (name, score) in metrics {
                input = input.metric(name, score);
            }
            cmd_apply_session(&ctx, &input)
        }
        Some(Commands::CheckTransition) => cmd_check_transition(&ctx),
        Some(Commands::Advance { confirm }) => cmd_advance(&ctx, confirm),
        Some(Commands::Rollback { to, reason }) => cmd_rollback(&ctx, &to, &reason),
        Some(Commands::AddTask {
            tier,
            module,
            description,
        }) => cmd_add_task(&ctx, &tier, module.as_deref(), &description),
        Some(Commands::SetStatus { status, task }) => cmd_set_status(&ctx, &task, &status),
        Some(Commands::Lookup { dimension, key }) => cmd_lookup(&ctx, &dimension, &key),
        Some(Commands::CheckIndex) => cmd_check_index(&ctx),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_parsing() {
        assert_eq!(parse_metric("coverage=80"), Ok(("coverage".to_string(), 80)));
        assert!(parse_metric("coverage").is_err());
        assert!(parse_metric("coverage=101").is_err());
        assert!(parse_metric("=5").is_err());
    }

    #[test]
    fn apply_session_accepts_repeated_and_listed_values() {
        let cli = Cli::try_parse_from([
            "phasebook",
            "apply-session",
            "--summary",
            "done",
            "--completed",
            "a",
            "b",
            "--issues",
            "flaky",
            "--metric",
            "coverage=70",
        ])
        .expect("parse");

        let Some(Commands::ApplySession {
            completed,
            issues,
            metrics,
            ..
        }) = cli.command
        else {
            unreachable!("parsed as apply-session");
        };
        assert_eq!(completed, ["a", "b"]);
        assert_eq!(issues, ["flaky"]);
        assert_eq!(metrics, [("coverage".to_string(), 70)]);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["phasebook", "status", "--json", "-C", "/tmp/p"])
            .expect("parse");
        assert!(cli.json);
        assert_eq!(cli.project, PathBuf::from("/tmp/p"));
    }
}
