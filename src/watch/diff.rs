//! Change detection between two directory snapshots.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use crate::watch::{
    events::{ChangeEvent, EventType},
    snapshot::DirectorySnapshot,
};

/// Differences between a previous and a current [`DirectorySnapshot`].
///
/// Paths are kept sorted so the emitted event order is deterministic.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub files_created: BTreeSet<PathBuf>,
    pub files_deleted: BTreeSet<PathBuf>,
    pub files_modified: BTreeSet<PathBuf>,
    pub files_moved: BTreeMap<PathBuf, PathBuf>,
    pub dirs_created: BTreeSet<PathBuf>,
    pub dirs_deleted: BTreeSet<PathBuf>,
    pub dirs_modified: BTreeSet<PathBuf>,
    pub dirs_moved: BTreeMap<PathBuf, PathBuf>,
}

impl SnapshotDiff {
    /// Compares two snapshots of the same root.
    ///
    /// A path present in both snapshots whose file identity changed counts
    /// as deleted and re-created. A deleted identity that reappears under a
    /// created path is reported as a single move. Entries keeping their
    /// identity are modified when their mtime or size changed.
    pub fn between(previous: &DirectorySnapshot, current: &DirectorySnapshot) -> Self {
        let mut created: BTreeSet<PathBuf> = current
            .paths()
            .filter(|path| previous.stat(path).is_none())
            .cloned()
            .collect();
        let mut deleted: BTreeSet<PathBuf> = previous
            .paths()
            .filter(|path| current.stat(path).is_none())
            .cloned()
            .collect();

        let common: BTreeSet<&PathBuf> = previous
            .paths()
            .filter(|path| current.stat(path).is_some())
            .collect();
        for path in &common {
            if previous.id_of(path) != current.id_of(path) {
                created.insert((*path).clone());
                deleted.insert((*path).clone());
            }
        }

        let mut moved = BTreeMap::new();
        for old_path in deleted.clone() {
            let Some(id) = previous.id_of(&old_path) else {
                continue;
            };
            if let Some(new_path) = current.path_for(id)
                && created.contains(new_path)
            {
                deleted.remove(&old_path);
                created.remove(new_path);
                moved.insert(old_path, new_path.clone());
            }
        }

        let mut modified = BTreeSet::new();
        for path in common {
            if previous.id_of(path) != current.id_of(path) {
                continue;
            }
            if let (Some(before), Some(after)) = (previous.stat(path), current.stat(path))
                && (before.mtime != after.mtime || before.size != after.size)
            {
                modified.insert(path.clone());
            }
        }

        let mut diff = Self::default();
        for path in created {
            if is_dir(current, &path) {
                diff.dirs_created.insert(path);
            } else {
                diff.files_created.insert(path);
            }
        }
        for path in deleted {
            if is_dir(previous, &path) {
                diff.dirs_deleted.insert(path);
            } else {
                diff.files_deleted.insert(path);
            }
        }
        for path in modified {
            if is_dir(current, &path) {
                diff.dirs_modified.insert(path);
            } else {
                diff.files_modified.insert(path);
            }
        }
        for (from, to) in moved {
            if is_dir(current, &to) {
                diff.dirs_moved.insert(from, to);
            } else {
                diff.files_moved.insert(from, to);
            }
        }
        diff
    }

    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.files_created.is_empty()
            && self.files_deleted.is_empty()
            && self.files_modified.is_empty()
            && self.files_moved.is_empty()
            && self.dirs_created.is_empty()
            && self.dirs_deleted.is_empty()
            && self.dirs_modified.is_empty()
            && self.dirs_moved.is_empty()
    }

    /// Converts the diff into events: deletions, modifications, moves, then
    /// creations, with files ahead of directories in each group.
    pub fn into_events(self) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        let simple = |events: &mut Vec<ChangeEvent>, kind, is_dir, paths: BTreeSet<PathBuf>| {
            events.extend(paths.into_iter().map(|path| ChangeEvent::new(kind, is_dir, path)));
        };
        let moves = |events: &mut Vec<ChangeEvent>, is_dir, pairs: BTreeMap<PathBuf, PathBuf>| {
            events.extend(pairs.into_iter().map(|(from, to)| ChangeEvent::moved(is_dir, from, to)));
        };

        simple(&mut events, EventType::Deleted, false, self.files_deleted);
        simple(&mut events, EventType::Deleted, true, self.dirs_deleted);
        simple(&mut events, EventType::Modified, false, self.files_modified);
        simple(&mut events, EventType::Modified, true, self.dirs_modified);
        moves(&mut events, false, self.files_moved);
        moves(&mut events, true, self.dirs_moved);
        simple(&mut events, EventType::Created, false, self.files_created);
        simple(&mut events, EventType::Created, true, self.dirs_created);
        events
    }
}

fn is_dir(snapshot: &DirectorySnapshot, path: &Path) -> bool {
    snapshot.stat(path).is_some_and(|record| record.is_directory)
}

#[cfg(test)]
mod tests {
    use std::{
        fs::{OpenOptions, create_dir, remove_file, rename, write},
        io::Write,
    };

    use tempfile::TempDir;

    use crate::watch::{
        diff::SnapshotDiff,
        events::{ChangeEvent, EventType},
        snapshot::DirectorySnapshot,
        stop::StopSignal,
    };

    fn snap(dir: &TempDir) -> DirectorySnapshot {
        DirectorySnapshot::take(dir.path(), true, &StopSignal::new()).unwrap()
    }

    #[test]
    fn test_identical_snapshots_have_no_diff() {
        let dir = TempDir::new().unwrap();
        write(dir.path().join("a.txt"), b"a").unwrap();
        let first = snap(&dir);
        let second = snap(&dir);
        assert!(SnapshotDiff::between(&first, &second).is_empty());
    }

    #[test]
    fn test_created_and_deleted_files() {
        let dir = TempDir::new().unwrap();
        write(dir.path().join("old.txt"), b"old").unwrap();
        let before = snap(&dir);

        // Create before deleting so the new entry cannot reuse the inode.
        create_dir(dir.path().join("new_dir")).unwrap();
        remove_file(dir.path().join("old.txt")).unwrap();
        let after = snap(&dir);

        let diff = SnapshotDiff::between(&before, &after);
        assert!(diff.files_deleted.contains(&dir.path().join("old.txt")));
        assert!(diff.dirs_created.contains(&dir.path().join("new_dir")));
        assert!(diff.files_moved.is_empty());
    }

    #[test]
    fn test_size_change_is_a_modification() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("grow.txt");
        write(&path, b"1").unwrap();
        let before = snap(&dir);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"2345").unwrap();
        drop(file);
        let after = snap(&dir);

        let diff = SnapshotDiff::between(&before, &after);
        assert!(diff.files_modified.contains(&path));
        assert!(diff.files_created.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_rename_is_detected_as_move() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("from.txt");
        let to = dir.path().join("to.txt");
        write(&from, b"payload").unwrap();
        let before = snap(&dir);

        rename(&from, &to).unwrap();
        let after = snap(&dir);

        let diff = SnapshotDiff::between(&before, &after);
        assert_eq!(diff.files_moved.get(&from), Some(&to));
        assert!(diff.files_created.is_empty());
        assert!(diff.files_deleted.is_empty());

        let events = diff.into_events();
        assert!(events.contains(&ChangeEvent::moved(false, from, to)));
    }

    #[test]
    fn test_event_order_puts_deletions_first() {
        let dir = TempDir::new().unwrap();
        write(dir.path().join("gone.txt"), b"x").unwrap();
        let before = snap(&dir);

        write(dir.path().join("fresh.txt"), b"y").unwrap();
        remove_file(dir.path().join("gone.txt")).unwrap();
        let after = snap(&dir);

        let events = SnapshotDiff::between(&before, &after).into_events();
        let kinds: Vec<EventType> = events.iter().map(|event| event.event_type).collect();
        let deleted_at = kinds.iter().position(|k| *k == EventType::Deleted).unwrap();
        let created_at = kinds.iter().position(|k| *k == EventType::Created).unwrap();
        assert!(deleted_at < created_at);
        assert!(events.iter().all(|event| !event.is_synthetic));
    }
}
