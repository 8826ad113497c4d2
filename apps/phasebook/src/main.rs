//! # Phasebook
//!
//! The command-line front end for the phasebook engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │              apps/phasebook (THE BINARY)             │
//! │                                                      │
//! │  ┌─────────────┐  ┌──────────────┐  ┌────────────┐   │
//! │  │    CLI      │  │   Project    │  │   Config   │   │
//! │  │   (clap)    │  │   layout     │  │   (toml)   │   │
//! │  └──────┬──────┘  └──────┬───────┘  └─────┬──────┘   │
//! │         └────────────────┼────────────────┘          │
//! │                          ▼                           │
//! │                 ┌────────────────┐                   │
//! │                 │ phasebook-core │                   │
//! │                 │  (THE LOGIC)   │                   │
//! │                 └────────────────┘                   │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! phasebook init --master MASTER.md
//! phasebook add-task --tier critical "Implement database module"
//! phasebook assemble-context
//! phasebook apply-session -s "Finished schema" --completed "Implement database module"
//! phasebook check-transition && phasebook advance --confirm
//! ```

use clap::Parser;
use phasebook::cli::{self, CommandStatus};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    // PHASEBOOK_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("PHASEBOOK_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "phasebook=debug,phasebook_core=debug"
    } else {
        "phasebook=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    // Logs go to stderr; stdout carries command output only.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    match cli::execute(cli) {
        Ok(CommandStatus::Success) => {}
        Ok(status) => std::process::exit(status.exit_code()),
        Err(e) => {
            tracing::error!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
