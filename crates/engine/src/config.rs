//! TOML configuration for the reconciliation engine.
//!
//! Every section and key is optional; a missing file section falls back to
//! the defaults below.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use specmerge_core::{EntityKind, LAST_MODIFIED};
use specmerge_storage::schema::{JournalMode, StorageOptions};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub storage: StorageConfig,
    pub merge: MergeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Milliseconds SQLite waits on a locked database.
    pub busy_timeout_ms: u64,
    /// One of `wal`, `delete`, `truncate`.
    pub journal_mode: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5000,
            journal_mode: "wal".into(),
        }
    }
}

impl StorageConfig {
    pub fn to_options(&self) -> Result<StorageOptions, ConfigError> {
        let journal_mode = match self.journal_mode.to_ascii_lowercase().as_str() {
            "wal" => JournalMode::Wal,
            "delete" => JournalMode::Delete,
            "truncate" => JournalMode::Truncate,
            other => {
                return Err(ConfigError::Invalid {
                    field: "storage.journal_mode",
                    reason: format!("unsupported mode {other:?}"),
                });
            }
        };
        Ok(StorageOptions {
            busy_timeout_ms: self.busy_timeout_ms,
            journal_mode,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Run VACUUM after a successful commit.
    pub compact_after_commit: bool,
    /// Refuse an update whose snapshot is not newer than the stored watermark.
    pub require_newer_snapshot: bool,
    /// Non-key fields left out of record comparison.
    pub ignored_fields: Vec<String>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            compact_after_commit: true,
            require_newer_snapshot: true,
            ignored_fields: vec![LAST_MODIFIED.to_string()],
        }
    }
}

impl ReconcileConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), "loaded config");
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.storage.to_options()?;
        for field in &self.merge.ignored_fields {
            let known = EntityKind::ALL
                .iter()
                .any(|k| k.descriptor().field_index(field).is_some());
            if !known {
                return Err(ConfigError::Invalid {
                    field: "merge.ignored_fields",
                    reason: format!("no entity has a field named {field:?}"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = ReconcileConfig::from_toml_str("").unwrap();
        assert_eq!(config.storage.busy_timeout_ms, 5000);
        assert!(config.merge.compact_after_commit);
        assert!(config.merge.require_newer_snapshot);
        assert_eq!(config.merge.ignored_fields, vec![LAST_MODIFIED.to_string()]);
    }

    #[test]
    fn partial_sections_override_only_given_keys() {
        let config = ReconcileConfig::from_toml_str(
            r#"
            [merge]
            compact_after_commit = false
            ignored_fields = ["lastModified", "rating"]

            [storage]
            journal_mode = "delete"
            "#,
        )
        .unwrap();
        assert!(!config.merge.compact_after_commit);
        assert!(config.merge.require_newer_snapshot);
        assert_eq!(config.merge.ignored_fields.len(), 2);
        assert_eq!(config.storage.to_options().unwrap().journal_mode, JournalMode::Delete);
    }

    #[test]
    fn unknown_ignored_field_is_rejected() {
        let err = ReconcileConfig::from_toml_str("[merge]\nignored_fields = [\"colour\"]\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "merge.ignored_fields", .. }));
    }

    #[test]
    fn bad_journal_mode_is_rejected() {
        let err = ReconcileConfig::from_toml_str("[storage]\njournal_mode = \"memory\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("storage.journal_mode"));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("specmerge.toml");
        std::fs::write(&path, "[storage]\nbusy_timeout_ms = 250\n").unwrap();
        let config = ReconcileConfig::load(&path).unwrap();
        assert_eq!(config.storage.busy_timeout_ms, 250);
        assert!(ReconcileConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
