//! # Configuration Loading
//!
//! Reads `phasebook.toml` into the core [`EngineConfig`].
//!
//! ```toml
//! [phases]
//! order = ["planning", "design", "implementation", "testing", "deployment", "maintenance"]
//!
//! [transition]
//! high_priority_threshold_percent = 90
//! require_no_blockers = true
//! health_floors = { coverage = 75 }
//!
//! [[keywords]]
//! keyword = "database"
//! module = "database"
//!
//! [assembly]
//! include_emergency = true
//!
//! [storage]
//! documents = "files"   # or "redb"
//! ```
//!
//! Every section is optional. Leaving out `keywords` keeps the stock table;
//! `keywords = []` disables keyword resolution.

use phasebook_core::{EngineConfig, EngineError, KeywordRule};
use serde::Deserialize;
use std::path::Path;

/// Maximum size of a configuration file (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

#[derive(Deserialize)]
struct KeywordProbe {
    #[serde(default)]
    keywords: Option<serde::de::IgnoredAny>,
}

/// Parse configuration text and validate it.
pub fn parse_config(text: &str) -> Result<EngineConfig, EngineError> {
    let mut config: EngineConfig =
        toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
    let probe: KeywordProbe =
        toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
    if probe.keywords.is_none() {
        config.keywords = KeywordRule::defaults();
    }
    config.validate()?;
    Ok(config)
}

/// Load configuration from `path`.
///
/// A missing file yields the defaults unless `required` is set, which is
/// the case when the path was given explicitly.
pub fn load_config(path: &Path, required: bool) -> Result<EngineConfig, EngineError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > MAX_CONFIG_FILE_SIZE => {
            return Err(EngineError::Config(format!(
                "{} is {} bytes, exceeds maximum allowed {} bytes",
                path.display(),
                meta.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
            tracing::debug!("No config at {:?}; using defaults", path);
            return Ok(EngineConfig::with_default_keywords());
        }
        Err(e) => {
            return Err(EngineError::Config(format!(
                "Cannot read {}: {}",
                path.display(),
                e
            )));
        }
    }

    let text = std::fs::read_to_string(path)
        .map_err(|e| EngineError::Config(format!("Cannot read {}: {}", path.display(), e)))?;
    let config = parse_config(&text)
        .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
    tracing::debug!("Loaded config from {:?}", path);
    Ok(config)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use phasebook_core::DocumentBackend;

    #[test]
    fn empty_file_is_defaults_with_stock_keywords() {
        let config = parse_config("").expect("parse");
        assert_eq!(config, EngineConfig::with_default_keywords());
    }

    #[test]
    fn sections_override_defaults() {
        let config = parse_config(
            r#"
            [phases]
            order = ["draft", "review", "publish"]

            [transition]
            high_priority_threshold_percent = 75
            health_floors = { coverage = 60 }

            [storage]
            documents = "redb"
            "#,
        )
        .expect("parse");

        assert_eq!(config.phases.order.len(), 3);
        assert_eq!(config.transition.high_priority_threshold_percent, 75);
        assert!(config.transition.require_no_blockers);
        assert_eq!(config.transition.health_floors.get("coverage"), Some(&60));
        assert_eq!(config.storage.documents, DocumentBackend::Redb);
        assert_eq!(config.keywords, KeywordRule::defaults());
    }

    #[test]
    fn explicit_empty_keywords_disable_resolution() {
        let config = parse_config("keywords = []").expect("parse");
        assert!(config.keywords.is_empty());
    }

    #[test]
    fn unknown_keys_and_bad_values_rejected() {
        assert!(parse_config("[transition]\nthreshold = 3").is_err());
        assert!(parse_config("[transition]\nhigh_priority_threshold_percent = 120").is_err());
        assert!(parse_config("[phases]\norder = []").is_err());
    }

    #[test]
    fn missing_file_depends_on_required() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("phasebook.toml");
        assert!(load_config(&path, false).is_ok());
        assert!(matches!(
            load_config(&path, true),
            Err(EngineError::Config(_))
        ));
    }
}
