//! # File-backed Document Store
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<tier>/<id>.md        document body (plain text, hand-editable)
//! <root>/<tier>/<id>.log.json  update log (JSON array)
//! ```
//!
//! Each file is replaced atomically (temp file + rename). A body without a
//! log file is a valid document with an empty log, so operators can drop new
//! `.md` files in by hand.

use super::DocumentStore;
use crate::record::write_atomic;
use crate::{DocTier, EngineError, PromptDocument, UpdateLogEntry};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const BODY_EXTENSION: &str = "md";
const LOG_SUFFIX: &str = ".log.json";

/// Document store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FileDocumentStore {
    root: PathBuf,
}

impl FileDocumentStore {
    /// Open a store rooted at `root`. Directories are created lazily on write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tier_dir(&self, tier: DocTier) -> PathBuf {
        self.root.join(tier.as_str())
    }

    fn body_path(&self, tier: DocTier, id: &str) -> PathBuf {
        self.tier_dir(tier).join(format!("{}.{}", id, BODY_EXTENSION))
    }

    fn log_path(&self, tier: DocTier, id: &str) -> PathBuf {
        self.tier_dir(tier).join(format!("{}{}", id, LOG_SUFFIX))
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, EngineError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(EngineError::Io(format!("Read {}: {}", path.display(), e))),
    }
}

fn remove_optional(path: &Path) -> Result<(), EngineError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(EngineError::Io(format!("Remove {}: {}", path.display(), e))),
    }
}

impl DocumentStore for FileDocumentStore {
    fn get(&self, tier: DocTier, id: &str) -> Result<Option<PromptDocument>, EngineError> {
        crate::types::validate_document_id(id)?;
        let Some(body) = read_optional(&self.body_path(tier, id))? else {
            return Ok(None);
        };
        let body = String::from_utf8(body).map_err(|e| {
            EngineError::Serialization(format!("{}/{} is not UTF-8: {}", tier, id, e))
        })?;

        let update_log = match read_optional(&self.log_path(tier, id))? {
            Some(bytes) => serde_json::from_slice::<Vec<UpdateLogEntry>>(&bytes).map_err(|e| {
                EngineError::Serialization(format!("update log of {}/{}: {}", tier, id, e))
            })?,
            None => Vec::new(),
        };

        Ok(Some(PromptDocument {
            tier,
            id: id.to_string(),
            body,
            update_log,
        }))
    }

    fn put(&mut self, doc: &PromptDocument) -> Result<(), EngineError> {
        crate::types::validate_document_id(&doc.id)?;
        let log = serde_json::to_vec_pretty(&doc.update_log)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        // Log first: a body is only ever visible next to the log that explains it.
        write_atomic(&self.log_path(doc.tier, &doc.id), &log)?;
        write_atomic(&self.body_path(doc.tier, &doc.id), doc.body.as_bytes())
    }

    fn restore(
        &mut self,
        tier: DocTier,
        id: &str,
        prior: Option<&PromptDocument>,
    ) -> Result<(), EngineError> {
        match prior {
            Some(doc) => self.put(doc),
            None => {
                crate::types::validate_document_id(id)?;
                remove_optional(&self.body_path(tier, id))?;
                remove_optional(&self.log_path(tier, id))
            }
        }
    }

    fn ids(&self, tier: DocTier) -> Result<Vec<String>, EngineError> {
        let dir = self.tier_dir(tier);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(EngineError::Io(format!("List {}: {}", dir.display(), e))),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| EngineError::Io(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(BODY_EXTENSION)
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
