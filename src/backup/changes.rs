//! Timestamp-based change detection against the last-backup marker.
//!
//! Walks each source directory and keeps the regular files whose
//! modification time is strictly newer than the marker. Anything that
//! cannot be read during the walk is skipped with a warning; a single
//! unreadable entry must never abort a backup.

use globset::GlobSet;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Converts a filesystem timestamp to unix epoch microseconds, the unit the
/// last-backup marker stores.
pub fn unix_micros(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_micros() as i64,
        // Pre-epoch mtimes sort before any marker ever written.
        Err(e) => -(e.duration().as_micros() as i64),
    }
}

/// Returns every regular file under `source_dirs` modified strictly after
/// `since` (epoch microseconds).
///
/// `since = None` includes every file, which is how an incremental run with
/// no prior marker degrades into a full one. A file whose mtime equals
/// `since` exactly is not included. Directories are visited in the order
/// they are configured; order within a directory is unspecified.
pub fn changed_files(source_dirs: &[PathBuf], since: Option<i64>, excludes: &GlobSet) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for dir in source_dirs {
        debug!("Scanning source directory {:?}", dir);
        for entry in WalkDir::new(dir) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {:?}: {}", dir, e);
                    continue;
                }
            };
            // Symlinks and special files are not file_type().is_file().
            if !entry.file_type().is_file() {
                trace!("Skipping {:?}, not a regular file", entry.path());
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(dir) {
                if excludes.is_match(rel) {
                    trace!("Skipping {:?}, matches exclude pattern", entry.path());
                    continue;
                }
            }

            let md = match entry.metadata() {
                Ok(md) => md,
                Err(e) => {
                    warn!("Skipping {:?}, cannot read metadata: {}", entry.path(), e);
                    continue;
                }
            };
            let mtime = match md.modified() {
                Ok(mtime) => unix_micros(mtime),
                Err(e) => {
                    warn!("Skipping {:?}, cannot read mtime: {}", entry.path(), e);
                    continue;
                }
            };

            if since.map_or(true, |since| mtime > since) {
                trace!("Including changed file {:?}", entry.path());
                files.push(entry.into_path());
            }
        }
    }

    files
}
