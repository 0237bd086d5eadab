//! Orchestration of backup and restore runs.
//!
//! Each invocation moves through enumerate -> archive -> encrypt -> persist
//! in order. The encrypted artifact is staged as a temporary file inside
//! the backup directory and renamed in only once complete, and the state
//! document is rewritten only after the rename, so an interrupted run
//! leaves no artifact and no marker pointing at one.

use crate::backup::archive;
use crate::backup::changes;
use crate::backup::config::{BackupConfig, BackupKind, HistoryEntry, LastBackup};
use crate::backup::encrypt::{CipherBox, RedactedString};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use chrono::{DateTime, Utc};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use itertools::Itertools;
use std::fs;
use std::fs::File;
use std::io::{BufReader, BufWriter, IntoInnerError};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;
use validator::{Validate, ValidationError, ValidationErrors};

/// Extension shared by every artifact this engine writes and recognizes.
pub static ARCHIVE_FILE_EXT: &str = "tar.gz.age";
static TIME_LABEL_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Result of a completed (non-no-op) backup run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupReport {
    pub kind: BackupKind,
    pub archive_path: PathBuf,
    pub files_count: u64,
}

/// Outcome of an incremental run: either a completed backup, or the
/// recognized "nothing to do" path that mutates no state at all.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackupOutcome {
    Completed(BackupReport),
    NoChanges,
}

/// An artifact discovered in the backup directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Engine context built once per process: loaded state, passphrase, label
/// and exclude patterns. There is no ambient state; every operation goes
/// through this object, and invocations are expected to be serialized by
/// the caller.
pub struct BackupEngine {
    state_path: PathBuf,
    config: BackupConfig,
    label: String,
    excludes: GlobSet,
    cipher: CipherBox,
}

fn validate_label(name: &str) -> std::result::Result<(), ValidationError> {
    if name.is_empty() || name.chars().any(|c| std::path::is_separator(c) || c == '\0') {
        return Err(ValidationError::new("InvalidLabel")
            .with_message(format!("Invalid label {name:?}, must not contain path separators").into()));
    }
    if name.len() > 100 {
        return Err(ValidationError::new("InvalidLabel")
            .with_message("Invalid label, maximum len is 100".into()));
    }

    Ok(())
}

fn build_excludes(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(GlobBuilder::new(pattern).literal_separator(true).build()?);
    }
    Ok(builder.build()?)
}

impl BackupEngine {
    pub fn new<P: Into<PathBuf>>(
        state_path: P,
        label: String,
        exclude_patterns: &[String],
        passphrase: RedactedString,
    ) -> Result<BackupEngine> {
        let state_path = state_path.into();
        let config = BackupConfig::load(&state_path)?;
        config.validate()?;
        validate_label(&label).map_err(|e| {
            let mut errors = ValidationErrors::new();
            errors.add("label", e);
            Error::from(errors)
        })?;

        Ok(Self {
            state_path,
            config,
            label,
            excludes: build_excludes(exclude_patterns)?,
            cipher: CipherBox::new(passphrase)?,
        })
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Backs up every file currently discoverable under the source
    /// directories, regardless of the marker.
    pub fn full_backup(&mut self) -> Result<BackupReport> {
        info!("Starting full backup");
        let started = Utc::now();
        let files = changes::changed_files(&self.config.source_dirs, None, &self.excludes);
        self.run_backup(BackupKind::Full, started, files)
    }

    /// Backs up only files modified since the last backup marker.
    ///
    /// With no marker this delegates to [`full_backup`](Self::full_backup);
    /// with a marker but nothing changed it returns
    /// [`BackupOutcome::NoChanges`] without touching the filesystem or the
    /// state document.
    pub fn incremental_backup(&mut self) -> Result<BackupOutcome> {
        let Some(marker) = &self.config.last_backup else {
            info!("No prior backup found, creating a full backup instead");
            return self.full_backup().map(BackupOutcome::Completed);
        };

        info!("Starting incremental backup since marker time {}", marker.time);
        let started = Utc::now();
        let files = changes::changed_files(
            &self.config.source_dirs,
            Some(marker.time),
            &self.excludes,
        );
        if files.is_empty() {
            info!("No changes since last backup");
            return Ok(BackupOutcome::NoChanges);
        }

        self.run_backup(BackupKind::Incremental, started, files)
            .map(BackupOutcome::Completed)
    }

    // `started` is sampled by the caller before enumeration begins. A
    // file modified at any point during the walk or the archive write
    // stays newer than the marker and is picked up again by the next
    // incremental run; sampling the clock any later would lose files
    // modified behind the walker.
    fn run_backup(
        &mut self,
        kind: BackupKind,
        started: DateTime<Utc>,
        files: Vec<PathBuf>,
    ) -> Result<BackupReport> {
        let time_label = started.format(TIME_LABEL_FORMAT).to_string();
        let files_count = files.len() as u64;
        info!("Enumerated {} files for {} backup", files_count, kind);

        fs::create_dir_all(&self.config.backup_dir)
            .map_err(Error::from)
            .with_msg(format!(
                "Create backup directory {:?} failed",
                self.config.backup_dir
            ))?;

        info!("Archiving and encrypting {} files", files_count);
        let mut staged = NamedTempFile::new_in(&self.config.backup_dir)?;
        let encryptor = self.cipher.wrap_writer(BufWriter::new(&mut staged))?;
        archive::write_archive(&files, BufWriter::new(encryptor))?
            .into_inner()
            .map_err(IntoInnerError::into_error)?
            .finish()?
            .into_inner()
            .map_err(IntoInnerError::into_error)?;

        let file_name = format!("{}_{}_{}.{}", self.label, kind, time_label, ARCHIVE_FILE_EXT);
        let archive_path = self.config.backup_dir.join(&file_name);
        staged
            .persist(&archive_path)
            .map_err(|e| Error::from(e.error))
            .with_msg(format!("Rename artifact into {:?} failed", archive_path))?;
        info!("Artifact written to {:?}", archive_path);

        // Persisting is last: the marker never references an artifact that
        // is not fully on disk.
        self.config.last_backup = Some(LastBackup {
            kind,
            time: started.timestamp_micros(),
            files_count,
        });
        self.config.backup_history.push(HistoryEntry {
            kind,
            time: time_label,
            path: archive_path.clone(),
            files_count: match kind {
                BackupKind::Full => None,
                BackupKind::Incremental => Some(files_count),
            },
        });
        self.config.save(&self.state_path)?;

        Ok(BackupReport {
            kind,
            archive_path,
            files_count,
        })
    }

    /// Decrypts an artifact and unpacks it into `restore_dir`, recreating
    /// the relative paths captured at archive time. Returns the number of
    /// entries restored.
    ///
    /// The artifact is decrypted and authenticated in full before anything
    /// is unpacked, so a wrong passphrase or a corrupted artifact makes no
    /// filesystem changes.
    pub fn restore<P1: AsRef<Path>, P2: AsRef<Path>>(
        &self,
        archive_path: P1,
        restore_dir: P2,
    ) -> Result<usize> {
        let archive_path = archive_path.as_ref();
        let restore_dir = restore_dir.as_ref();
        info!("Restoring from {:?} into {:?}", archive_path, restore_dir);

        let file = File::open(archive_path)
            .map_err(Error::from)
            .with_msg(format!("Open artifact {:?} failed", archive_path))?;
        let plaintext = self.cipher.decrypt_to_temp(BufReader::new(file))?;
        let count = archive::unpack_archive(BufReader::new(plaintext), restore_dir)?;
        info!("Restored {} entries into {:?}", count, restore_dir);
        Ok(count)
    }

    /// Lists artifacts in the backup directory matching this engine's
    /// naming convention, sorted by name. An absent backup directory is
    /// reported as empty rather than an error.
    pub fn list_backups(&self) -> Result<Vec<ArtifactInfo>> {
        let dir = &self.config.backup_dir;
        if !dir.exists() {
            info!("Backup directory {:?} does not exist yet", dir);
            return Ok(Vec::new());
        }

        let prefix = format!("{}_", self.label);
        let suffix = format!(".{}", ARCHIVE_FILE_EXT);
        let artifacts = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?.to_string();
                if !name.starts_with(&prefix) || !name.ends_with(&suffix) {
                    return None;
                }
                let md = entry.metadata().ok()?;
                if !md.is_file() {
                    return None;
                }
                Some(ArtifactInfo {
                    name,
                    path: entry.path(),
                    size_bytes: md.len(),
                })
            })
            .sorted_by(|a, b| a.name.cmp(&b.name))
            .collect_vec();
        Ok(artifacts)
    }
}
