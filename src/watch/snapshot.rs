//! Cancellable, inode-aware directory snapshots for polling mode.
//!
//! A [`DirectorySnapshot`] is built by one walk rooted at a directory and is
//! never patched afterwards; the polling emitter replaces it wholesale on
//! every cycle.

use std::{
    collections::HashMap,
    fs::{Metadata, metadata, read_dir, symlink_metadata},
    io::{Error as IoError, ErrorKind},
    path::{Path, PathBuf},
    time::SystemTime,
};

use tracing::debug;

use crate::{error::domain::SnapshotError, watch::stop::StopSignal};

/// Identity of a file across renames: inode and device numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    pub inode: u64,
    pub device: u64,
}

/// Metadata captured for each snapshot entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatRecord {
    pub size: u64,
    pub mtime: Option<SystemTime>,
    /// `None` on platforms without stable inode numbers.
    pub id: Option<FileId>,
    pub is_directory: bool,
}

impl StatRecord {
    fn from_metadata(meta: &Metadata) -> Self {
        Self {
            size: meta.len(),
            mtime: meta.modified().ok(),
            id: file_id(meta),
            is_directory: meta.is_dir(),
        }
    }
}

#[cfg(unix)]
fn file_id(meta: &Metadata) -> Option<FileId> {
    use std::os::unix::fs::MetadataExt;

    Some(FileId {
        inode: meta.ino(),
        device: meta.dev(),
    })
}

#[cfg(not(unix))]
fn file_id(_meta: &Metadata) -> Option<FileId> {
    None
}

/// Point-in-time record of a directory tree.
#[derive(Debug, Clone, Default)]
pub struct DirectorySnapshot {
    root: PathBuf,
    stat_by_path: HashMap<PathBuf, StatRecord>,
    path_by_inode: HashMap<FileId, PathBuf>,
}

impl DirectorySnapshot {
    /// Creates a snapshot with no entries, used before the baseline exists.
    pub fn empty(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Walks `root` and records every reachable entry.
    ///
    /// The root is stat'ed first. Each directory is listed and every entry
    /// is stat'ed without following symlinks; subdirectories are descended
    /// into only when `recursive` is set.
    ///
    /// The walk checks `stop` before every listing and before recording each
    /// entry. Once the signal is raised the walk returns what it has
    /// collected so far; cancellation is never an error.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotError` if the root cannot be stat'ed or listed, or
    /// on OS errors other than the tolerated races: entries or directories
    /// that vanish mid-walk and subdirectories that deny access.
    pub fn take(root: &Path, recursive: bool, stop: &StopSignal) -> Result<Self, SnapshotError> {
        let mut snapshot = Self::empty(root);

        let root_meta = metadata(root).map_err(|source| SnapshotError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        snapshot.insert(root.to_path_buf(), StatRecord::from_metadata(&root_meta));

        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            if stop.is_stopped() {
                debug!("Snapshot of {:?} cancelled before listing {:?}", root, dir);
                return Ok(snapshot);
            }

            let entries = match read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if is_vanished(&e) => {
                    debug!("Directory vanished during walk: {:?}", dir);
                    continue;
                }
                Err(e) if e.kind() == ErrorKind::PermissionDenied && dir != root => {
                    debug!("Skipping unreadable subtree: {:?}", dir);
                    continue;
                }
                Err(source) => return Err(SnapshotError::Io { path: dir, source }),
            };

            for entry in entries {
                if stop.is_stopped() {
                    debug!("Snapshot of {:?} cancelled inside {:?}", root, dir);
                    return Ok(snapshot);
                }

                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) if is_vanished(&e) => break,
                    Err(source) => return Err(SnapshotError::Io { path: dir, source }),
                };

                let path = entry.path();
                let meta = match symlink_metadata(&path) {
                    Ok(meta) => meta,
                    Err(e) => {
                        debug!("Dropping entry {:?}: {}", path, e);
                        continue;
                    }
                };

                if recursive && meta.is_dir() {
                    pending.push(path.clone());
                }
                snapshot.insert(path, StatRecord::from_metadata(&meta));
            }
        }

        Ok(snapshot)
    }

    fn insert(&mut self, path: PathBuf, record: StatRecord) {
        if let Some(id) = record.id {
            self.path_by_inode.insert(id, path.clone());
        }
        self.stat_by_path.insert(path, record);
    }

    /// Root directory the snapshot was taken from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of recorded entries, the root included.
    pub fn len(&self) -> usize {
        self.stat_by_path.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.stat_by_path.is_empty()
    }

    /// Every recorded path.
    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.stat_by_path.keys()
    }

    /// Metadata recorded for `path`.
    pub fn stat(&self, path: &Path) -> Option<&StatRecord> {
        self.stat_by_path.get(path)
    }

    /// Identity recorded for `path`.
    pub fn id_of(&self, path: &Path) -> Option<FileId> {
        self.stat(path).and_then(|record| record.id)
    }

    /// Path currently holding the file with identity `id`.
    pub fn path_for(&self, id: FileId) -> Option<&PathBuf> {
        self.path_by_inode.get(&id)
    }
}

/// Listing raced with a deletion or a directory being replaced by a file.
fn is_vanished(error: &IoError) -> bool {
    matches!(error.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory)
}
