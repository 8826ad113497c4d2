//! # Project Layout
//!
//! Where a project keeps its files, and how the engine is opened on them.
//!
//! ```text
//! <project>/
//! ├── phasebook.toml          configuration (optional)
//! └── .phasebook/
//!     ├── state.json          project state record
//!     ├── state.json.lock     present only while a write is in progress
//!     ├── index.json          knowledge index
//!     ├── changelog.jsonl     append-only changelog
//!     └── docs/  | docs.redb  document store (files or redb backend)
//! ```

use phasebook_core::{
    DocTier, DocumentBackend, DocumentStore, Engine, EngineConfig, EngineError, FileChangelog,
    FileDocumentStore, FileStateBackend, KnowledgeIndex, PromptDocument, RedbDocumentStore,
    primitives::MAX_INDEX_FILE_SIZE,
};
use std::path::{Path, PathBuf};

/// Data directory name under the project root.
pub const DATA_DIR: &str = ".phasebook";

/// Configuration file name under the project root.
pub const CONFIG_FILE: &str = "phasebook.toml";

/// The engine as the CLI runs it.
pub type ProjectEngine = Engine<FileStateBackend, ProjectStore, FileChangelog>;

// =============================================================================
// LAYOUT
// =============================================================================

#[derive(Debug, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.data_dir().join("state.json")
    }

    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.data_dir().join("index.json")
    }

    #[must_use]
    pub fn changelog_path(&self) -> PathBuf {
        self.data_dir().join("changelog.jsonl")
    }

    #[must_use]
    pub fn documents_dir(&self) -> PathBuf {
        self.data_dir().join("docs")
    }

    #[must_use]
    pub fn documents_db(&self) -> PathBuf {
        self.data_dir().join("docs.redb")
    }

    /// Create the data directory if needed.
    pub fn ensure_data_dir(&self) -> Result<(), EngineError> {
        let dir = self.data_dir();
        std::fs::create_dir_all(&dir)
            .map_err(|e| EngineError::Io(format!("Cannot create {}: {}", dir.display(), e)))
    }

    /// Open the engine with `config`. The data directory must already exist;
    /// only `init` creates it.
    pub fn open_engine(&self, config: EngineConfig) -> Result<ProjectEngine, EngineError> {
        let dir = self.data_dir();
        if !dir.is_dir() {
            return Err(EngineError::NotInitialized(format!(
                "{} does not exist; run `phasebook init`",
                dir.display()
            )));
        }
        let store = ProjectStore::open(self, config.storage.documents)?;
        tracing::debug!(
            "Opening project at {:?} (documents: {:?})",
            self.root,
            config.storage.documents
        );
        Engine::new(
            config,
            FileStateBackend::new(self.state_path()),
            store,
            FileChangelog::new(self.changelog_path()),
        )
    }

    /// Load the knowledge index. A missing file is an empty index.
    pub fn load_index(&self) -> Result<KnowledgeIndex, EngineError> {
        let path = self.index_path();
        match std::fs::metadata(&path) {
            Ok(meta) if meta.len() > MAX_INDEX_FILE_SIZE as u64 => {
                return Err(EngineError::Serialization(format!(
                    "Index file {} is {} bytes, exceeds maximum allowed {} bytes",
                    path.display(),
                    meta.len(),
                    MAX_INDEX_FILE_SIZE
                )));
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No index at {:?}; using an empty index", path);
                return Ok(KnowledgeIndex::new());
            }
            Err(e) => {
                return Err(EngineError::Io(format!("Stat {}: {}", path.display(), e)));
            }
        }
        let bytes = std::fs::read(&path)
            .map_err(|e| EngineError::Io(format!("Read {}: {}", path.display(), e)))?;
        KnowledgeIndex::from_json_slice(&bytes)
    }

    /// Write an empty index unless one exists.
    pub fn ensure_index(&self) -> Result<(), EngineError> {
        let path = self.index_path();
        if path.exists() {
            return Ok(());
        }
        std::fs::write(&path, KnowledgeIndex::new().to_json_vec()?)
            .map_err(|e| EngineError::Io(format!("Write {}: {}", path.display(), e)))
    }
}

// =============================================================================
// PROJECT STORE
// =============================================================================

/// Document store selected by `storage.documents`.
#[derive(Debug)]
pub enum ProjectStore {
    Files(FileDocumentStore),
    Redb(RedbDocumentStore),
}

impl ProjectStore {
    pub fn open(layout: &ProjectLayout, backend: DocumentBackend) -> Result<Self, EngineError> {
        match backend {
            DocumentBackend::Files => Ok(Self::Files(FileDocumentStore::new(
                layout.documents_dir(),
            ))),
            DocumentBackend::Redb => Ok(Self::Redb(RedbDocumentStore::open(
                layout.documents_db(),
            )?)),
        }
    }
}

impl DocumentStore for ProjectStore {
    fn get(&self, tier: DocTier, id: &str) -> Result<Option<PromptDocument>, EngineError> {
        match self {
            Self::Files(store) => store.get(tier, id),
            Self::Redb(store) => store.get(tier, id),
        }
    }

    fn put(&mut self, doc: &PromptDocument) -> Result<(), EngineError> {
        match self {
            Self::Files(store) => store.put(doc),
            Self::Redb(store) => store.put(doc),
        }
    }

    fn restore(
        &mut self,
        tier: DocTier,
        id: &str,
        prior: Option<&PromptDocument>,
    ) -> Result<(), EngineError> {
        match self {
            Self::Files(store) => store.restore(tier, id, prior),
            Self::Redb(store) => store.restore(tier, id, prior),
        }
    }

    fn ids(&self, tier: DocTier) -> Result<Vec<String>, EngineError> {
        match self {
            Self::Files(store) => store.ids(tier),
            Self::Redb(store) => store.ids(tier),
        }
    }
}
