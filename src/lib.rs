//! # snapvault
//!
//! A personal file-backup tool with encryption, compression, and
//! incremental change detection.
//!
//! ## Features
//!
//! - **Full and Incremental Backups**: whole-file change detection against
//!   the last-backup marker
//! - **Compression**: gzip (deflate) TAR archives
//! - **Encryption**: age passphrase encryption, authenticated at rest
//! - **Restore**: decrypts and unpacks an artifact, rebuilding the
//!   original tree layout
//! - **Crash Safety**: artifacts and the state document are staged in
//!   temporary files and renamed into place
//!
//! ## Quick Start
//!
//! ```no_run
//! use snapvault::backup::encrypt::RedactedString;
//! use snapvault::backup::engine::BackupEngine;
//!
//! let mut engine = BackupEngine::new(
//!     "backup_config.json",
//!     "snapvault".into(),
//!     &[],
//!     RedactedString::new("my_secret_passphrase"),
//! )?;
//! engine.incremental_backup()?;
//! # Ok::<(), snapvault::backup::result_error::error::Error>(())
//! ```

pub mod backup;
