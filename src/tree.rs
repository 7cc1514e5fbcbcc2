// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::SyncError;

/// Extension of files still being written
pub const PARTIAL_EXTENSION: &str = "partial";

/// What a tree sync changed in the destination, as paths relative to it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: Vec<PathBuf>,
    pub updated: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub directories_created: Vec<PathBuf>,
    pub unchanged: usize,
}

impl SyncReport {
    /// Number of filesystem mutations applied to the destination
    pub fn changes(&self) -> usize {
        self.created.len() + self.updated.len() + self.removed.len() + self.directories_created.len()
    }

    pub fn is_noop(&self) -> bool {
        self.changes() == 0
    }
}

/// Tracks the last successfully applied path so failures can say how far
/// the sync got
struct Progress {
    report: SyncReport,
    last_completed: Option<PathBuf>,
}

impl Progress {
    fn io_error(&self, operation: &'static str, path: &Path, source: io::Error) -> SyncError {
        SyncError::Io {
            operation,
            path: path.to_path_buf(),
            last_completed: self.last_completed.clone(),
            source,
        }
    }

    fn done(&mut self, rel: &Path) {
        self.last_completed = Some(rel.to_path_buf());
    }
}

/// Make `dest` an exact mirror of `source`.
///
/// New and changed files are copied, missing directories created, and every
/// entry under `dest` without a counterpart in `source` is deleted. `dest`
/// itself is never removed. Files are written through a temporary sibling
/// and renamed into place, so an interrupted sync never leaves a truncated
/// file behind.
///
/// Symlinks in `source` are followed and land in `dest` as regular files
/// and directories. Leftover `*.partial` files in `source` are ignored.
pub fn sync_tree(source: &Path, dest: &Path) -> Result<SyncReport, SyncError> {
    if !source.is_dir() {
        return Err(SyncError::SourceMissing(source.to_path_buf()));
    }
    if dest.exists() && !dest.is_dir() {
        return Err(SyncError::DestinationNotDirectory(dest.to_path_buf()));
    }

    let mut progress = Progress {
        report: SyncReport::default(),
        last_completed: None,
    };

    std::fs::create_dir_all(dest)
        .map_err(|e| progress.io_error("create directory", dest, e))?;

    let mut wanted: HashSet<PathBuf> = HashSet::new();

    let entries = WalkDir::new(source)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name();
    for entry in entries {
        let entry = entry.map_err(|e| SyncError::WalkFailed {
            path: source.to_path_buf(),
            source: e,
        })?;
        if is_partial(entry.path()) {
            debug!(path = %entry.path().display(), "Ignoring interrupted write");
            continue;
        }
        let rel = relative(source, entry.path());
        let target = dest.join(&rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            wanted.insert(rel.clone());
            sync_directory(&target, &rel, &mut progress)?;
        } else if file_type.is_file() {
            wanted.insert(rel.clone());
            sync_file(entry.path(), &target, &rel, &mut progress)?;
        } else {
            warn!(path = %entry.path().display(), "Skipping entry that is neither file nor directory");
        }
    }

    purge(dest, &wanted, &mut progress)?;

    debug!(
        source = %source.display(),
        dest = %dest.display(),
        changes = progress.report.changes(),
        "Tree sync finished"
    );
    Ok(progress.report)
}

fn sync_directory(target: &Path, rel: &Path, progress: &mut Progress) -> Result<(), SyncError> {
    if target.is_dir() {
        return Ok(());
    }
    if target.exists() {
        std::fs::remove_file(target).map_err(|e| progress.io_error("remove", target, e))?;
        progress.report.removed.push(rel.to_path_buf());
    }
    std::fs::create_dir(target).map_err(|e| progress.io_error("create directory", target, e))?;
    progress.report.directories_created.push(rel.to_path_buf());
    progress.done(rel);
    Ok(())
}

fn sync_file(
    source: &Path,
    target: &Path,
    rel: &Path,
    progress: &mut Progress,
) -> Result<(), SyncError> {
    if target.is_dir() {
        std::fs::remove_dir_all(target).map_err(|e| progress.io_error("remove", target, e))?;
        progress.report.removed.push(rel.to_path_buf());
    }

    if !target.exists() {
        copy_atomic(source, target).map_err(|e| progress.io_error("copy", target, e))?;
        progress.report.created.push(rel.to_path_buf());
        progress.done(rel);
        return Ok(());
    }

    let differs = files_differ(source, target).map_err(|e| progress.io_error("compare", target, e))?;
    if differs {
        copy_atomic(source, target).map_err(|e| progress.io_error("copy", target, e))?;
        progress.report.updated.push(rel.to_path_buf());
        progress.done(rel);
    } else {
        progress.report.unchanged += 1;
    }
    Ok(())
}

fn purge(dest: &Path, wanted: &HashSet<PathBuf>, progress: &mut Progress) -> Result<(), SyncError> {
    let mut entries = WalkDir::new(dest).min_depth(1).sort_by_file_name().into_iter();

    while let Some(entry) = entries.next() {
        let entry = entry.map_err(|e| SyncError::WalkFailed {
            path: dest.to_path_buf(),
            source: e,
        })?;
        let rel = relative(dest, entry.path());
        if wanted.contains(&rel) {
            continue;
        }

        if entry.file_type().is_dir() {
            std::fs::remove_dir_all(entry.path())
                .map_err(|e| progress.io_error("remove", entry.path(), e))?;
            entries.skip_current_dir();
        } else {
            std::fs::remove_file(entry.path())
                .map_err(|e| progress.io_error("remove", entry.path(), e))?;
        }
        debug!(path = %rel.display(), "Purged");
        progress.report.removed.push(rel.clone());
        progress.done(&rel);
    }
    Ok(())
}

fn is_partial(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == PARTIAL_EXTENSION)
}

fn relative(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

/// Size first, then content hash. Modification times are ignored so that a
/// fresh clone (new mtimes everywhere) does not look changed.
fn files_differ(a: &Path, b: &Path) -> io::Result<bool> {
    if std::fs::metadata(a)?.len() != std::fs::metadata(b)?.len() {
        return Ok(true);
    }
    Ok(hash_file(a)? != hash_file(b)?)
}

fn hash_file(path: &Path) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_vec())
}

fn copy_atomic(source: &Path, target: &Path) -> io::Result<()> {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let partial = target.with_file_name(format!(".{name}.{PARTIAL_EXTENSION}"));

    let result = std::fs::copy(source, &partial).and_then(|_| std::fs::rename(&partial, target));
    if result.is_err() {
        let _ = std::fs::remove_file(&partial);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    fn file_set(root: &Path) -> Vec<PathBuf> {
        let mut files: Vec<_> = WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .map(|e| relative(root, e.unwrap().path()))
            .collect();
        files.sort();
        files
    }

    #[test]
    fn copies_new_tree_into_empty_destination() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        write(&src.path().join("feed.xml"), "<rss/>");
        write(&src.path().join("media/ep1.mp3"), "audio");

        let report = sync_tree(src.path(), &dst.path().join("mirror")).unwrap();

        assert_eq!(report.created.len(), 2);
        assert_eq!(report.directories_created, vec![PathBuf::from("media")]);
        assert_eq!(
            std::fs::read_to_string(dst.path().join("mirror/media/ep1.mp3")).unwrap(),
            "audio"
        );
    }

    #[test]
    fn destination_file_set_equals_source_after_sync() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        write(&src.path().join("a.txt"), "a");
        write(&src.path().join("nested/b.txt"), "b");
        write(&dst.path().join("stale.txt"), "old");
        write(&dst.path().join("gone/deep/c.txt"), "c");

        let report = sync_tree(src.path(), dst.path()).unwrap();

        assert_eq!(file_set(src.path()), file_set(dst.path()));
        assert!(report.removed.contains(&PathBuf::from("stale.txt")));
        assert!(report.removed.contains(&PathBuf::from("gone")));
        assert!(!dst.path().join("gone").exists());
    }

    #[test]
    fn second_sync_is_a_noop() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        write(&src.path().join("a.txt"), "a");
        write(&src.path().join("nested/b.txt"), "b");

        assert!(!sync_tree(src.path(), dst.path()).unwrap().is_noop());
        let second = sync_tree(src.path(), dst.path()).unwrap();

        assert!(second.is_noop());
        assert_eq!(second.unchanged, 2);
    }

    #[test]
    fn same_size_content_change_is_detected() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        write(&src.path().join("a.txt"), "aaaa");
        sync_tree(src.path(), dst.path()).unwrap();

        write(&src.path().join("a.txt"), "bbbb");
        let report = sync_tree(src.path(), dst.path()).unwrap();

        assert_eq!(report.updated, vec![PathBuf::from("a.txt")]);
        assert_eq!(std::fs::read_to_string(dst.path().join("a.txt")).unwrap(), "bbbb");
    }

    #[test]
    fn removed_source_file_disappears_from_destination() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        write(&src.path().join("keep.mp3"), "k");
        write(&src.path().join("drop.mp3"), "d");
        sync_tree(src.path(), dst.path()).unwrap();

        std::fs::remove_file(src.path().join("drop.mp3")).unwrap();
        let report = sync_tree(src.path(), dst.path()).unwrap();

        assert_eq!(report.removed, vec![PathBuf::from("drop.mp3")]);
        assert!(!dst.path().join("drop.mp3").exists());
        assert!(dst.path().join("keep.mp3").exists());
    }

    #[test]
    fn kind_mismatch_is_replaced() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        write(&src.path().join("item"), "now a file");
        write(&src.path().join("folder/x.txt"), "x");
        write(&dst.path().join("item/old.txt"), "was a directory");
        write(&dst.path().join("folder"), "was a file");

        sync_tree(src.path(), dst.path()).unwrap();

        assert!(dst.path().join("item").is_file());
        assert!(dst.path().join("folder").is_dir());
        assert_eq!(file_set(src.path()), file_set(dst.path()));
    }

    #[test]
    fn never_touches_siblings_of_destination() {
        let src = tempdir().unwrap();
        let root = tempdir().unwrap();
        write(&src.path().join("a.txt"), "a");
        write(&root.path().join("other-channel/feed.xml"), "keep me");

        sync_tree(src.path(), &root.path().join("this-channel")).unwrap();

        assert!(root.path().join("other-channel/feed.xml").exists());
    }

    #[test]
    fn empty_source_empties_destination_but_keeps_it() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        write(&dst.path().join("a.txt"), "a");

        sync_tree(src.path(), dst.path()).unwrap();

        assert!(dst.path().is_dir());
        assert!(file_set(dst.path()).is_empty());
    }

    #[test]
    fn missing_source_is_rejected() {
        let dst = tempdir().unwrap();
        let result = sync_tree(&dst.path().join("nope"), dst.path());
        assert!(matches!(result, Err(SyncError::SourceMissing(_))));
    }

    #[test]
    fn destination_that_is_a_file_is_rejected() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        let file = dst.path().join("file");
        write(&file, "x");

        let result = sync_tree(src.path(), &file);
        assert!(matches!(result, Err(SyncError::DestinationNotDirectory(_))));
    }

    #[test]
    fn no_partial_files_left_behind() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        write(&src.path().join("a.txt"), "a");

        sync_tree(src.path(), dst.path()).unwrap();

        assert!(!dst.path().join(".a.txt.partial").exists());
    }

    #[test]
    fn interrupted_writes_in_source_are_not_mirrored() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        write(&src.path().join("feed.xml"), "<rss/>");
        write(&src.path().join("feed.xml.partial"), "<rss");
        write(&dst.path().join("feed.xml.partial"), "<rs");

        let report = sync_tree(src.path(), dst.path()).unwrap();

        assert_eq!(file_set(dst.path()), vec![PathBuf::from("feed.xml")]);
        assert_eq!(report.removed, vec![PathBuf::from("feed.xml.partial")]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_mirrored_as_their_targets() {
        let outside = tempdir().unwrap();
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        write(&outside.path().join("cover.jpg"), "jpeg");
        write(&outside.path().join("shared/intro.mp3"), "intro");
        std::os::unix::fs::symlink(outside.path().join("cover.jpg"), src.path().join("cover.jpg"))
            .unwrap();
        std::os::unix::fs::symlink(outside.path().join("shared"), src.path().join("shared"))
            .unwrap();

        sync_tree(src.path(), dst.path()).unwrap();

        assert_eq!(
            file_set(dst.path()),
            vec![
                PathBuf::from("cover.jpg"),
                PathBuf::from("shared"),
                PathBuf::from("shared/intro.mp3")
            ]
        );
        assert!(!dst.path().join("cover.jpg").is_symlink());
        assert_eq!(
            std::fs::read_to_string(dst.path().join("shared/intro.mp3")).unwrap(),
            "intro"
        );
        assert!(sync_tree(src.path(), dst.path()).unwrap().is_noop());
    }
}
