//! # State Record
//!
//! The only write path to the project state.
//!
//! ## Storage Backends
//!
//! `StateRecord` is generic over a [`StateBackend`]:
//! - `MemoryStateBackend`: encoded bytes behind an `RwLock` (tests, embedding)
//! - `FileStateBackend`: a JSON file replaced atomically via temp file + rename
//!
//! ## Locking
//!
//! Writers are serialized twice over: an in-process `Mutex` orders threads
//! sharing one record, and the backend lock (an exclusive lock file for the
//! file backend) orders separate processes. Both are scope-bound guards, so
//! they are released on every exit path. Readers take no lock and always
//! re-read from the backend.

use crate::config::PhaseOrder;
use crate::formats::{state_from_bytes, state_to_bytes};
use crate::{EngineError, ProjectState};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

// =============================================================================
// BACKEND LOCK
// =============================================================================

/// Exclusive write lock held by a backend. Released on drop.
#[derive(Debug)]
pub struct BackendLock {
    path: Option<PathBuf>,
}

impl BackendLock {
    /// A lock with nothing to release, for backends serialized in-process.
    #[must_use]
    pub fn in_process() -> Self {
        Self { path: None }
    }

    /// Acquire a lock file. Fails with `LockHeld` if it already exists.
    pub fn acquire_file(path: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let path = path.into();
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(EngineError::LockHeld(format!(
                    "{} exists; another process is writing (remove it if that process died)",
                    path.display()
                )));
            }
            Err(e) => {
                return Err(EngineError::Io(format!(
                    "Cannot create lock {}: {}",
                    path.display(),
                    e
                )));
            }
        };
        // Owner pid is informational only.
        let _ = writeln!(file, "{}", std::process::id());
        Ok(Self { path: Some(path) })
    }
}

impl Drop for BackendLock {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = fs::remove_file(path);
        }
    }
}

// =============================================================================
// STATE BACKEND TRAIT
// =============================================================================

/// Durable storage for the encoded state record.
///
/// Backends only move whole records; validation is the record layer's job.
pub trait StateBackend {
    /// Whether a record has been stored.
    fn exists(&self) -> Result<bool, EngineError>;

    /// Load and decode the whole record.
    fn load(&self) -> Result<ProjectState, EngineError>;

    /// Replace the whole record. Must never leave a half-written record behind.
    fn store(&self, state: &ProjectState) -> Result<(), EngineError>;

    /// Take the cross-process write lock.
    fn lock(&self) -> Result<BackendLock, EngineError>;
}

// =============================================================================
// MEMORY BACKEND
// =============================================================================

/// In-memory backend. Stores encoded bytes so every read decodes afresh.
#[derive(Debug, Default)]
pub struct MemoryStateBackend {
    bytes: RwLock<Option<Vec<u8>>>,
}

impl MemoryStateBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the backend with raw bytes, bypassing validation.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: RwLock::new(Some(bytes)),
        }
    }
}

impl StateBackend for MemoryStateBackend {
    fn exists(&self) -> Result<bool, EngineError> {
        let guard = self
            .bytes
            .read()
            .map_err(|_| EngineError::LockHeld("memory state lock poisoned".into()))?;
        Ok(guard.is_some())
    }

    fn load(&self) -> Result<ProjectState, EngineError> {
        let guard = self
            .bytes
            .read()
            .map_err(|_| EngineError::LockHeld("memory state lock poisoned".into()))?;
        let bytes = guard
            .as_deref()
            .ok_or_else(|| EngineError::NotInitialized("no state record stored".into()))?;
        state_from_bytes(bytes)
    }

    fn store(&self, state: &ProjectState) -> Result<(), EngineError> {
        let bytes = state_to_bytes(state)?;
        let mut guard = self
            .bytes
            .write()
            .map_err(|_| EngineError::LockHeld("memory state lock poisoned".into()))?;
        *guard = Some(bytes);
        Ok(())
    }

    fn lock(&self) -> Result<BackendLock, EngineError> {
        Ok(BackendLock::in_process())
    }
}

// =============================================================================
// FILE BACKEND
// =============================================================================

/// Whole-file JSON backend.
#[derive(Debug, Clone)]
pub struct FileStateBackend {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileStateBackend {
    /// Use `path` for the record and `<path>.lock` as the lock file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Self { path, lock_path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

/// Write `bytes` to `path` via a sibling temp file and rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), EngineError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| {
            EngineError::Io(format!("Cannot create {}: {}", parent.display(), e))
        })?;
    }
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    fs::write(&tmp, bytes)
        .map_err(|e| EngineError::Io(format!("Write {}: {}", tmp.display(), e)))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        EngineError::Io(format!("Replace {}: {}", path.display(), e))
    })
}

impl StateBackend for FileStateBackend {
    fn exists(&self) -> Result<bool, EngineError> {
        Ok(self.path.is_file())
    }

    fn load(&self) -> Result<ProjectState, EngineError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(EngineError::NotInitialized(format!(
                    "{} does not exist",
                    self.path.display()
                )));
            }
            Err(e) => {
                return Err(EngineError::Io(format!(
                    "Read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };
        state_from_bytes(&bytes)
    }

    fn store(&self, state: &ProjectState) -> Result<(), EngineError> {
        write_atomic(&self.path, &state_to_bytes(state)?)
    }

    fn lock(&self) -> Result<BackendLock, EngineError> {
        BackendLock::acquire_file(&self.lock_path)
    }
}

// =============================================================================
// STATE RECORD
// =============================================================================

/// Validated, serialized access to the project state.
#[derive(Debug)]
pub struct StateRecord<B: StateBackend> {
    backend: B,
    phases: PhaseOrder,
    writer: Mutex<()>,
}

/// An open write scope: the state as loaded under the lock, plus a commit hook.
pub struct Transaction<'a, B: StateBackend> {
    backend: &'a B,
    phases: &'a PhaseOrder,
    state: ProjectState,
    committed: bool,
}

impl<B: StateBackend> Transaction<'_, B> {
    /// The state as it was when the transaction opened (or last committed).
    #[must_use]
    pub fn state(&self) -> &ProjectState {
        &self.state
    }

    /// Validate and persist `next`.
    ///
    /// `next` must extend the current histories, never rewrite them.
    pub fn commit(&mut self, next: ProjectState) -> Result<(), EngineError> {
        next.validate(self.phases)?;
        next.check_succession(&self.state)?;
        self.backend.store(&next)?;
        self.state = next;
        self.committed = true;
        Ok(())
    }

    /// The phase order commits are validated against.
    #[must_use]
    pub fn phases(&self) -> &PhaseOrder {
        self.phases
    }

    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.committed
    }
}

/// An open initialization scope. The record may be replaced wholesale.
pub struct Initialization<'a, B: StateBackend> {
    backend: &'a B,
    phases: &'a PhaseOrder,
}

impl<B: StateBackend> Initialization<'_, B> {
    /// Validate and persist the initial record.
    pub fn store(&mut self, state: &ProjectState) -> Result<(), EngineError> {
        state.validate(self.phases)?;
        self.backend.store(state)
    }
}

impl<B: StateBackend> StateRecord<B> {
    #[must_use]
    pub fn new(backend: B, phases: PhaseOrder) -> Self {
        Self {
            backend,
            phases,
            writer: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[must_use]
    pub fn phases(&self) -> &PhaseOrder {
        &self.phases
    }

    /// Read the whole record. Never partial; never cached.
    pub fn read(&self) -> Result<ProjectState, EngineError> {
        let state = self.backend.load()?;
        state.validate(&self.phases)?;
        Ok(state)
    }

    /// Store an initial record. Refuses to overwrite unless `force` is set.
    pub fn initialize(&self, state: ProjectState, force: bool) -> Result<(), EngineError> {
        self.initialize_with(force, |init| init.store(&state))
    }

    /// Run `f` with both writer locks held to create the initial record.
    ///
    /// The existence check happens under the lock, before `f` runs, so
    /// anything `f` writes alongside the record is serialized with every
    /// other writer.
    pub fn initialize_with<T, F>(&self, force: bool, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Initialization<'_, B>) -> Result<T, EngineError>,
    {
        let _writer = self.acquire_writer()?;
        let _lock = self.backend.lock()?;
        if !force && self.backend.exists()? {
            return Err(EngineError::InvalidInput(
                "State record already exists. Use --force to overwrite.".into(),
            ));
        }
        let mut init = Initialization {
            backend: &self.backend,
            phases: &self.phases,
        };
        f(&mut init)
    }

    /// Apply `f` to the current record and persist the result.
    ///
    /// Calls are strictly sequential. If `f` fails or the result is invalid,
    /// nothing is written.
    pub fn mutate<F>(&self, f: F) -> Result<ProjectState, EngineError>
    where
        F: FnOnce(ProjectState) -> Result<ProjectState, EngineError>,
    {
        self.transaction(|tx| {
            let next = f(tx.state().clone())?;
            tx.commit(next)?;
            Ok(tx.state().clone())
        })
    }

    /// Run `f` with both writer locks held for its full duration.
    pub fn transaction<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Transaction<'_, B>) -> Result<T, EngineError>,
    {
        let _writer = self.acquire_writer()?;
        let _lock = self.backend.lock()?;
        let state = self.read()?;
        let mut tx = Transaction {
            backend: &self.backend,
            phases: &self.phases,
            state,
            committed: false,
        };
        f(&mut tx)
    }

    fn acquire_writer(&self) -> Result<std::sync::MutexGuard<'_, ()>, EngineError> {
        self.writer
            .lock()
            .map_err(|_| EngineError::LockHeld("state writer lock poisoned".into()))
    }
}

// =============================================================================
// TESTS
// =============================================================================
