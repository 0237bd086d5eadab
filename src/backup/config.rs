//! Persistent backup state: configuration, last-backup marker, history log.
//!
//! The whole state lives in a single JSON document. It is loaded once at
//! startup and rewritten wholesale after every completed backup; a document
//! that does not match the schema exactly is rejected as corrupt rather
//! than partially recovered.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use validator::Validate;

/// Kind tag of a completed backup, also used in artifact file names.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    #[display("full")]
    Full,
    #[display("incremental")]
    Incremental,
}

/// The single most recent completed backup.
///
/// `time` is unix epoch microseconds; it is the sole reference point for
/// change detection in incremental mode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LastBackup {
    pub kind: BackupKind,
    pub time: i64,
    pub files_count: u64,
}

/// Immutable audit record appended after each completed backup.
///
/// `time` holds the human-readable timestamp label used in the artifact
/// file name, not an instant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistoryEntry {
    pub kind: BackupKind,
    pub time: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_count: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct BackupConfig {
    #[validate(length(min = 1))]
    pub source_dirs: Vec<PathBuf>,
    pub backup_dir: PathBuf,
    pub last_backup: Option<LastBackup>,
    pub backup_history: Vec<HistoryEntry>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            source_dirs: vec![PathBuf::from("data")],
            backup_dir: PathBuf::from("backups"),
            last_backup: None,
            backup_history: Vec::new(),
        }
    }
}

impl BackupConfig {
    /// Loads the state document, falling back to defaults when it does not
    /// exist yet. A document that exists but cannot be parsed is a fatal
    /// [`Error::ConfigCorrupt`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<BackupConfig> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No state document at {:?}, using defaults", path);
            return Ok(BackupConfig::default());
        }

        let file = File::open(path)
            .map_err(Error::from)
            .with_msg(format!("Open state document {:?} failed", path))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| Error::ConfigCorrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Rewrites the full state document.
    ///
    /// Writes into a temporary file in the same directory and renames it
    /// into place, so a crash mid-write leaves the previous document
    /// intact. Truncating the target in place is not an option here.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut tmp = NamedTempFile::new_in(dir)
            .map_err(Error::from)
            .with_msg(format!("Create temporary state file in {:?} failed", dir))?;
        serde_json::to_writer_pretty(&mut tmp, self)?;
        tmp.flush()?;
        tmp.persist(path)
            .map_err(|e| Error::from(e.error))
            .with_msg(format!("Rename state document into {:?} failed", path))?;

        debug!("State document saved to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_config(dir: &Path) -> BackupConfig {
        BackupConfig {
            source_dirs: vec![dir.join("data")],
            backup_dir: dir.join("backups"),
            last_backup: Some(LastBackup {
                kind: BackupKind::Full,
                time: 1_700_000_000_000_000,
                files_count: 3,
            }),
            backup_history: vec![
                HistoryEntry {
                    kind: BackupKind::Full,
                    time: "20240101_120000".into(),
                    path: dir.join("backups/snapvault_full_20240101_120000.tar.gz.age"),
                    files_count: None,
                },
                HistoryEntry {
                    kind: BackupKind::Incremental,
                    time: "20240102_120000".into(),
                    path: dir.join("backups/snapvault_incremental_20240102_120000.tar.gz.age"),
                    files_count: Some(1),
                },
            ],
        }
    }

    #[test]
    fn test_load_missing_document_returns_defaults() {
        let temp = TempDir::new().unwrap();
        let config = BackupConfig::load(temp.path().join("backup_config.json")).unwrap();
        assert_eq!(config, BackupConfig::default());
        assert!(config.last_backup.is_none());
        assert!(config.backup_history.is_empty());
    }

    #[test]
    fn test_save_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("backup_config.json");

        let config = sample_config(temp.path());
        config.save(&path).unwrap();

        let loaded = BackupConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_save_overwrites_previous_document() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("backup_config.json");

        let mut config = sample_config(temp.path());
        config.save(&path).unwrap();

        config.last_backup = None;
        config.save(&path).unwrap();

        let loaded = BackupConfig::load(&path).unwrap();
        assert!(loaded.last_backup.is_none());
    }

    #[test]
    fn test_malformed_document_is_config_corrupt() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("backup_config.json");
        std::fs::write(&path, "{ not json").unwrap();

        match BackupConfig::load(&path) {
            Err(Error::ConfigCorrupt { .. }) => (),
            other => panic!("Expected ConfigCorrupt, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_field_is_config_corrupt() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("backup_config.json");
        std::fs::write(
            &path,
            r#"{"source_dirs": ["data"], "backup_dir": "backups", "last_backup": null,
               "backup_history": [], "schedule": "daily"}"#,
        )
        .unwrap();

        match BackupConfig::load(&path) {
            Err(Error::ConfigCorrupt { .. }) => (),
            other => panic!("Expected ConfigCorrupt, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_field_is_config_corrupt() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("backup_config.json");
        std::fs::write(&path, r#"{"source_dirs": ["data"]}"#).unwrap();

        match BackupConfig::load(&path) {
            Err(Error::ConfigCorrupt { .. }) => (),
            other => panic!("Expected ConfigCorrupt, got {:?}", other),
        }
    }

    #[test]
    fn test_history_files_count_omitted_when_none() {
        let entry = HistoryEntry {
            kind: BackupKind::Full,
            time: "20240101_120000".into(),
            path: PathBuf::from("backups/x.tar.gz.age"),
            files_count: None,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("files_count"));

        let parsed: HistoryEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn test_backup_kind_display_and_serde() {
        assert_eq!(BackupKind::Full.to_string(), "full");
        assert_eq!(BackupKind::Incremental.to_string(), "incremental");
        assert_eq!(serde_json::to_string(&BackupKind::Full).unwrap(), "\"full\"");
        assert_eq!(
            serde_json::from_str::<BackupKind>("\"incremental\"").unwrap(),
            BackupKind::Incremental
        );
    }

    #[test]
    fn test_validate_rejects_empty_source_dirs() {
        let config = BackupConfig {
            source_dirs: Vec::new(),
            ..BackupConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(BackupConfig::default().validate().is_ok());
    }
}
