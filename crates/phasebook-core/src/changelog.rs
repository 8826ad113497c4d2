//! # Changelog
//!
//! Append-only record of every committed engine operation.
//!
//! Entries are addressed by their timestamp: the id is the RFC 3339 form of
//! the timestamp, with a `-<n>` suffix when earlier entries share it.
//! The changelog is written after the state commit and is never rewritten.

use crate::EngineError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// What kind of operation produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Init,
    Session,
    Advance,
    Rollback,
    Task,
}

/// One line of the changelog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangelogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: ChangeKind,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

/// Derive the id for a new entry at `timestamp`, given the existing entries.
#[must_use]
pub fn entry_id(timestamp: DateTime<Utc>, existing: &[ChangelogEntry]) -> String {
    let base = timestamp.to_rfc3339_opts(SecondsFormat::Micros, true);
    let collisions = existing.iter().filter(|e| e.timestamp == timestamp).count();
    if collisions == 0 {
        base
    } else {
        format!("{}-{}", base, collisions)
    }
}

// =============================================================================
// CHANGELOG TRAIT
// =============================================================================

pub trait Changelog {
    /// Append one entry. Existing entries are never touched.
    fn append(&mut self, entry: &ChangelogEntry) -> Result<(), EngineError>;

    /// All entries, oldest first.
    fn entries(&self) -> Result<Vec<ChangelogEntry>, EngineError>;

    /// Build an entry with a fresh id and append it.
    fn record(
        &mut self,
        timestamp: DateTime<Utc>,
        kind: ChangeKind,
        summary: impl Into<String>,
        details: Vec<String>,
    ) -> Result<ChangelogEntry, EngineError>
    where
        Self: Sized,
    {
        let entry = ChangelogEntry {
            id: entry_id(timestamp, &self.entries()?),
            timestamp,
            kind,
            summary: summary.into(),
            details,
        };
        self.append(&entry)?;
        Ok(entry)
    }
}

// =============================================================================
// MEMORY CHANGELOG
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct MemoryChangelog {
    entries: Vec<ChangelogEntry>,
}

impl MemoryChangelog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Changelog for MemoryChangelog {
    fn append(&mut self, entry: &ChangelogEntry) -> Result<(), EngineError> {
        self.entries.push(entry.clone());
        Ok(())
    }

    fn entries(&self) -> Result<Vec<ChangelogEntry>, EngineError> {
        Ok(self.entries.clone())
    }
}

// =============================================================================
// FILE CHANGELOG
// =============================================================================

/// JSON Lines file, one entry per line, opened in append mode per write.
#[derive(Debug, Clone)]
pub struct FileChangelog {
    path: PathBuf,
}

impl FileChangelog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Changelog for FileChangelog {
    fn append(&mut self, entry: &ChangelogEntry) -> Result<(), EngineError> {
        let mut line =
            serde_json::to_string(entry).map_err(|e| EngineError::Serialization(e.to_string()))?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| EngineError::Io(format!("Open {}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes())
            .map_err(|e| EngineError::Io(format!("Append {}: {}", self.path.display(), e)))
    }

    fn entries(&self) -> Result<Vec<ChangelogEntry>, EngineError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(EngineError::Io(format!(
                    "Read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };
        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| {
                    EngineError::Serialization(format!(
                        "{} line {}: {}",
                        self.path.display(),
                        n.saturating_add(1),
                        e
                    ))
                })
            })
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================
