//! Compressed archive construction and unpacking.
//!
//! Archives are TAR streams compressed with gzip. Entry names are relative
//! to the common ancestor directory of all input files, so a restore
//! reconstructs the original tree layout instead of flattening it.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Computes the component-wise common ancestor directory of `files`.
///
/// This is a lexicographic prefix over path components, independent of the
/// filesystem: no paths are resolved or canonicalized. When the common
/// prefix is itself one of the input files (a single input, or one input
/// naming the prefix exactly), its parent directory is used so every entry
/// keeps a non-empty relative name. Returns `None` for an empty input.
pub fn common_ancestor(files: &[PathBuf]) -> Option<PathBuf> {
    let mut ancestor = files.first()?.clone();
    for file in files {
        while !file.starts_with(&ancestor) {
            if !ancestor.pop() {
                return Some(PathBuf::new());
            }
        }
    }
    if files.iter().any(|f| f == &ancestor) {
        ancestor.pop();
    }
    Some(ancestor)
}

/// Streams `files` as a gzip-compressed TAR archive into `writer` and
/// returns the writer once the archive is finished.
///
/// Unlike enumeration, archiving treats an unreadable input as a hard
/// error: the archive must be a faithful snapshot of what it claims to
/// contain, so a file that vanished between enumeration and archiving
/// aborts construction. An empty `files` produces a valid empty archive.
pub fn write_archive<W: Write>(files: &[PathBuf], writer: W) -> Result<W> {
    let mut builder = tar::Builder::new(GzEncoder::new(writer, Compression::default()));
    builder.follow_symlinks(true);

    if let Some(ancestor) = common_ancestor(files) {
        debug!("Archiving {} files relative to {:?}", files.len(), ancestor);
        for file in files {
            let name = file.strip_prefix(&ancestor)?;
            trace!("Adding {:?} as {:?}", file, name);
            builder
                .append_path_with_name(file, name)
                .map_err(Error::from)
                .with_msg(format!("Archiving {:?} failed", file))?;
        }
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

/// Unpacks a gzip-compressed TAR archive into `dest`, creating the
/// directory if needed. Returns the number of entries unpacked.
pub fn unpack_archive<R: Read>(reader: R, dest: &Path) -> Result<usize> {
    std::fs::create_dir_all(dest)
        .map_err(Error::from)
        .with_msg(format!("Create restore directory {:?} failed", dest))?;

    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    let mut count = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        trace!("Unpacking {:?}", entry.path());
        // unpack_in refuses entries whose path would escape dest.
        if entry.unpack_in(dest)? {
            count += 1;
        } else {
            warn!("Skipping entry {:?}, unsafe path", entry.path());
        }
    }
    debug!("Unpacked {} entries into {:?}", count, dest);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_common_ancestor_of_siblings() {
        let files = vec![PathBuf::from("/a/b/x.txt"), PathBuf::from("/a/b/y.txt")];
        assert_eq!(common_ancestor(&files), Some(PathBuf::from("/a/b")));
    }

    #[test]
    fn test_common_ancestor_of_nested_paths() {
        let files = vec![
            PathBuf::from("/a/b/x.txt"),
            PathBuf::from("/a/b/sub/y.txt"),
            PathBuf::from("/a/c/z.txt"),
        ];
        assert_eq!(common_ancestor(&files), Some(PathBuf::from("/a")));
    }

    #[test]
    fn test_common_ancestor_single_file_uses_parent() {
        let files = vec![PathBuf::from("/a/b/x.txt")];
        assert_eq!(common_ancestor(&files), Some(PathBuf::from("/a/b")));
    }

    #[test]
    fn test_common_ancestor_empty_input() {
        assert_eq!(common_ancestor(&[]), None);
    }

    #[test]
    fn test_common_ancestor_component_wise_not_string_wise() {
        // "/a/bc" must not be treated as a prefix of "/a/bcd".
        let files = vec![PathBuf::from("/a/bc/x.txt"), PathBuf::from("/a/bcd/y.txt")];
        assert_eq!(common_ancestor(&files), Some(PathBuf::from("/a")));
    }

    #[test]
    fn test_archive_round_trip_preserves_tree() {
        let src = TempDir::new().unwrap();
        std::fs::create_dir_all(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("a.txt"), b"content a").unwrap();
        std::fs::write(src.path().join("sub/b.txt"), b"content b").unwrap();

        let files = vec![src.path().join("a.txt"), src.path().join("sub/b.txt")];
        let bytes = write_archive(&files, Vec::new()).unwrap();

        let dest = TempDir::new().unwrap();
        let count = unpack_archive(Cursor::new(bytes), dest.path()).unwrap();
        assert_eq!(count, 2);
        assert_eq!(std::fs::read(dest.path().join("a.txt")).unwrap(), b"content a");
        assert_eq!(
            std::fs::read(dest.path().join("sub/b.txt")).unwrap(),
            b"content b"
        );
    }

    #[test]
    fn test_empty_file_list_produces_valid_empty_archive() {
        let bytes = write_archive(&[], Vec::new()).unwrap();
        assert!(!bytes.is_empty());

        let dest = TempDir::new().unwrap();
        let count = unpack_archive(Cursor::new(bytes), dest.path()).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_unreadable_input_aborts_construction() {
        let src = TempDir::new().unwrap();
        std::fs::write(src.path().join("a.txt"), b"content a").unwrap();

        let files = vec![src.path().join("a.txt"), src.path().join("vanished.txt")];
        assert!(write_archive(&files, Vec::new()).is_err());
    }

    #[test]
    fn test_unpack_skips_unsafe_paths_without_counting_them() {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

        let mut header = tar::Header::new_gnu();
        header.set_size(4);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "ok.txt", &b"safe"[..]).unwrap();

        let mut header = tar::Header::new_gnu();
        header.set_size(4);
        header.set_mode(0o644);
        // Builder::append_data rejects `..` in entry paths, so write the
        // name bytes directly to craft the unsafe entry.
        let name = b"../evil.txt";
        header.as_gnu_mut().unwrap().name[..name.len()].copy_from_slice(name);
        header.set_cksum();
        builder.append(&header, &b"evil"[..]).unwrap();

        let bytes = builder.into_inner().unwrap().finish().unwrap();

        let outer = TempDir::new().unwrap();
        let dest = outer.path().join("inner");
        let count = unpack_archive(Cursor::new(bytes), &dest).unwrap();

        assert_eq!(count, 1);
        assert!(dest.join("ok.txt").exists());
        assert!(!outer.path().join("evil.txt").exists());
    }

    #[test]
    fn test_unpack_creates_destination() {
        let src = TempDir::new().unwrap();
        std::fs::write(src.path().join("a.txt"), b"x").unwrap();
        let bytes = write_archive(&[src.path().join("a.txt")], Vec::new()).unwrap();

        let dest = TempDir::new().unwrap();
        let nested = dest.path().join("brand/new/dir");
        unpack_archive(Cursor::new(bytes), &nested).unwrap();
        assert!(nested.join("a.txt").exists());
    }
}
