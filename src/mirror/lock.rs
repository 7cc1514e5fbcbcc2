// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::PublishError;

/// Advisory lock serializing access to one mirror working tree.
///
/// The lock file sits next to the clone (`<clone>.lock`) so it can be taken
/// before the clone exists. Released on drop.
pub struct MirrorLock {
    file: File,
    path: PathBuf,
}

impl MirrorLock {
    /// Block until the lock is free
    pub fn acquire(mirror_path: &Path) -> Result<Self, PublishError> {
        let (file, path) = open_lock_file(mirror_path)?;
        file.lock_exclusive()
            .map_err(|e| PublishError::Lock {
                path: path.clone(),
                source: e,
            })?;
        Ok(Self::held(file, path))
    }

    /// Take the lock if nobody else holds it
    pub fn try_acquire(mirror_path: &Path) -> Result<Option<Self>, PublishError> {
        let (file, path) = open_lock_file(mirror_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self::held(file, path))),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                debug!(path = %path.display(), "Mirror lock held elsewhere");
                Ok(None)
            }
            Err(e) => Err(PublishError::Lock { path, source: e }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn held(mut file: File, path: PathBuf) -> Self {
        // Holder pid is informational only
        let _ = file.set_len(0);
        let _ = writeln!(file, "{}", std::process::id());
        debug!(path = %path.display(), "Acquired mirror lock");
        Self { file, path }
    }
}

impl Drop for MirrorLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("Failed to release mirror lock: {}", e);
        }
    }
}

fn lock_path(mirror_path: &Path) -> PathBuf {
    let name = mirror_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "mirror".to_string());
    mirror_path.with_file_name(format!("{name}.lock"))
}

fn open_lock_file(mirror_path: &Path) -> Result<(File, PathBuf), PublishError> {
    let path = lock_path(mirror_path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| PublishError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| PublishError::Lock {
            path: path.clone(),
            source: e,
        })?;
    Ok((file, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lock_file_sits_next_to_clone() {
        assert_eq!(
            lock_path(Path::new("feed_repos/podcastsnew")),
            PathBuf::from("feed_repos/podcastsnew.lock")
        );
    }

    #[test]
    fn second_holder_is_refused_until_release() {
        let dir = tempdir().unwrap();
        let mirror = dir.path().join("repos/mirror");

        let first = MirrorLock::acquire(&mirror).unwrap();
        assert!(first.path().exists());
        assert!(MirrorLock::try_acquire(&mirror).unwrap().is_none());

        drop(first);
        assert!(MirrorLock::try_acquire(&mirror).unwrap().is_some());
    }

    #[test]
    fn different_mirrors_do_not_contend() {
        let dir = tempdir().unwrap();
        let _a = MirrorLock::acquire(&dir.path().join("a")).unwrap();
        assert!(MirrorLock::try_acquire(&dir.path().join("b")).unwrap().is_some());
    }
}
