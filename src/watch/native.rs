//! Native change detection using the `notify` crate.
//!
//! OS notifications are translated into [`ChangeEvent`]s and queued for the
//! watch worker thread, which dispatches them one at a time.
//!
//! inotify reports one rename as three events sharing a tracker: `From`,
//! `To` and then `Both`. The [`Translator`] pairs them so a rename inside
//! the tree yields exactly one `moved` event. A `From` that finds no partner
//! within [`RENAME_WINDOW`] left the tree and becomes `deleted`; a `To`
//! without a pending `From` came from outside and becomes `created`.

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    mem::take,
    path::{Path, PathBuf},
    sync::Arc,
    thread::{Builder, JoinHandle},
    time::{Duration, Instant},
};

use {
    async_channel::{Receiver, Sender, unbounded},
    notify::{
        Config, Event, RecommendedWatcher, RecursiveMode, Watcher,
        event::{AccessKind, CreateKind, EventKind, ModifyKind, RemoveKind, RenameMode},
    },
    parking_lot::Mutex,
    tracing::{debug, error},
};

use crate::{
    error::domain::WatchError,
    watch::{
        events::{ChangeEvent, EventType},
        snapshot::DirectorySnapshot,
        stop::StopSignal,
    },
};

/// How long the first half of a rename waits for its second half.
pub const RENAME_WINDOW: Duration = Duration::from_millis(500);

/// OS-notification emitter for one watch root.
pub struct NativeEmitter {
    /// Kept alive for as long as notifications are wanted.
    _watcher: RecommendedWatcher,
    sender: Sender<ChangeEvent>,
    root: PathBuf,
    expiry: Option<JoinHandle<()>>,
}

impl Debug for NativeEmitter {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("NativeEmitter").field("root", &self.root).finish()
    }
}

impl NativeEmitter {
    /// Starts watching `root`.
    ///
    /// A helper thread turns rename halves that were never paired into
    /// `deleted` events; it exits once `stop` is raised or the queue closes.
    ///
    /// # Returns
    ///
    /// The emitter and the queue its events arrive on.
    ///
    /// # Errors
    ///
    /// Returns `WatchError::Notify` if the backend cannot watch the root and
    /// `WatchError::Spawn` if the helper thread cannot be created.
    pub fn new(
        root: &Path,
        recursive: bool,
        stop: StopSignal,
    ) -> Result<(Self, Receiver<ChangeEvent>), WatchError> {
        let (sender, receiver) = unbounded();
        let translator = Arc::new(Mutex::new(Translator::new(recursive)));

        let event_sender = sender.clone();
        let event_translator = translator.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    debug!("Raw file system event: {:?}", event);
                    let changes = event_translator.lock().push(&event, Instant::now());
                    queue(&event_sender, changes);
                }
                Err(e) => error!("File system watcher error: {}", e),
            },
            Config::default(),
        )?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(root, mode)?;
        debug!("Started watching directory: {:?}", root);

        let expiry_sender = sender.clone();
        let expiry = Builder::new()
            .name(format!("rename-expiry:{}", root.display()))
            .spawn(move || {
                while !stop.wait_timeout(RENAME_WINDOW) && !expiry_sender.is_closed() {
                    let changes = translator.lock().expire(Instant::now());
                    queue(&expiry_sender, changes);
                }
            })
            .map_err(WatchError::Spawn)?;

        Ok((
            Self {
                _watcher: watcher,
                sender,
                root: root.to_path_buf(),
                expiry: Some(expiry),
            },
            receiver,
        ))
    }

    /// Closes the event queue so the worker stops after the current event.
    pub fn close(&self) {
        self.sender.close();
    }

    /// Consumes queued events until the queue closes or `stop` is raised.
    pub fn run(receiver: Receiver<ChangeEvent>, stop: StopSignal, mut emit: impl FnMut(ChangeEvent)) {
        while let Ok(event) = receiver.recv_blocking() {
            if stop.is_stopped() {
                break;
            }
            emit(event);
        }
        debug!("Native emitter stopped");
    }
}

impl Drop for NativeEmitter {
    fn drop(&mut self) {
        self.close();
        if let Some(expiry) = self.expiry.take()
            && expiry.join().is_err()
        {
            error!("Rename expiry thread for {:?} panicked", self.root);
        }
    }
}

fn queue(sender: &Sender<ChangeEvent>, changes: Vec<ChangeEvent>) {
    for change in changes {
        if sender.try_send(change).is_err() {
            debug!("Event queue closed, dropping event");
        }
    }
}

/// First half of a rename, waiting for its destination.
#[derive(Debug)]
struct PendingRename {
    tracker: usize,
    source: PathBuf,
    seen: Instant,
}

/// Translates `notify` events into change events, pairing rename halves.
#[derive(Debug)]
struct Translator {
    recursive: bool,
    pending: Vec<PendingRename>,
    /// Trackers whose move was already emitted from the `To` half.
    paired: Vec<(usize, Instant)>,
}

impl Translator {
    fn new(recursive: bool) -> Self {
        Self {
            recursive,
            pending: Vec::new(),
            paired: Vec::new(),
        }
    }

    /// Translates one event, preceded by any rename half that expired.
    fn push(&mut self, event: &Event, now: Instant) -> Vec<ChangeEvent> {
        let mut changes = self.expire(now);
        changes.extend(self.translate(event, now));
        changes
    }

    /// Turns `From` halves older than [`RENAME_WINDOW`] into `deleted`.
    fn expire(&mut self, now: Instant) -> Vec<ChangeEvent> {
        let is_stale = |seen: Instant| now.saturating_duration_since(seen) >= RENAME_WINDOW;
        self.paired.retain(|(_, seen)| !is_stale(*seen));

        let (stale, fresh): (Vec<_>, Vec<_>) =
            take(&mut self.pending).into_iter().partition(|pending| is_stale(pending.seen));
        self.pending = fresh;
        stale
            .into_iter()
            .map(|pending| {
                debug!("Rename source never paired: {:?}", pending.source);
                ChangeEvent::new(EventType::Deleted, false, pending.source)
            })
            .collect()
    }

    fn take_pending(&mut self, tracker: usize) -> Option<PathBuf> {
        let index = self.pending.iter().position(|pending| pending.tracker == tracker)?;
        Some(self.pending.remove(index).source)
    }

    fn take_paired(&mut self, tracker: usize) -> bool {
        let before = self.paired.len();
        self.paired.retain(|(paired, _)| *paired != tracker);
        self.paired.len() != before
    }

    fn translate(&mut self, event: &Event, now: Instant) -> Vec<ChangeEvent> {
        let Some(source) = event.paths.first() else {
            return Vec::new();
        };

        match (&event.kind, event.attrs.tracker()) {
            (EventKind::Modify(ModifyKind::Name(RenameMode::Both)), tracker) if event.paths.len() >= 2 => {
                if let Some(tracker) = tracker {
                    if self.take_paired(tracker) {
                        return Vec::new();
                    }
                    self.take_pending(tracker);
                }
                self.moved(source, &event.paths[1])
            }
            (EventKind::Modify(ModifyKind::Name(RenameMode::From)), Some(tracker)) => {
                self.pending.push(PendingRename {
                    tracker,
                    source: source.clone(),
                    seen: now,
                });
                Vec::new()
            }
            (EventKind::Modify(ModifyKind::Name(RenameMode::To)), Some(tracker)) => {
                match self.take_pending(tracker) {
                    Some(from) => {
                        self.paired.push((tracker, now));
                        self.moved(&from, source)
                    }
                    None => vec![ChangeEvent::new(EventType::Created, source.is_dir(), source)],
                }
            }
            _ => classify(event, source),
        }
    }

    /// A move, followed on recursive watches by one synthetic move per
    /// entry found below a moved directory.
    fn moved(&self, source: &Path, destination: &Path) -> Vec<ChangeEvent> {
        let is_directory = destination.is_dir();
        let mut events = vec![ChangeEvent::moved(is_directory, source, destination)];
        if is_directory && self.recursive {
            events.extend(sub_moved_events(source, destination));
        }
        events
    }
}

/// Maps every event kind other than a paired rename.
fn classify(event: &Event, source: &Path) -> Vec<ChangeEvent> {
    let event_type = match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => EventType::Deleted,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => EventType::Created,
        EventKind::Create(_) => EventType::Created,
        EventKind::Modify(_) => EventType::Modified,
        EventKind::Remove(_) => EventType::Deleted,
        EventKind::Access(AccessKind::Open(_)) => EventType::Opened,
        EventKind::Access(AccessKind::Close(_)) => EventType::Closed,
        _ => {
            debug!("Ignoring event kind {:?} for path: {:?}", event.kind, source);
            return Vec::new();
        }
    };

    let is_directory = match event.kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => true,
        EventKind::Create(CreateKind::File) | EventKind::Remove(RemoveKind::File) => false,
        _ => source.is_dir(),
    };

    event
        .paths
        .iter()
        .map(|path| ChangeEvent::new(event_type, is_directory, path))
        .collect()
}

fn sub_moved_events(source: &Path, destination: &Path) -> Vec<ChangeEvent> {
    let snapshot = match DirectorySnapshot::take(destination, true, &StopSignal::new()) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            debug!("Cannot list moved directory {:?}: {}", destination, e);
            return Vec::new();
        }
    };

    let mut moved: Vec<(PathBuf, PathBuf, bool)> = snapshot
        .paths()
        .filter(|path| path.as_path() != destination)
        .filter_map(|path| {
            let relative = path.strip_prefix(destination).ok()?;
            let is_directory = snapshot.stat(path).is_some_and(|record| record.is_directory);
            Some((source.join(relative), path.clone(), is_directory))
        })
        .collect();
    moved.sort();

    moved
        .into_iter()
        .map(|(from, to, is_directory)| ChangeEvent::moved(is_directory, from, to).synthetic())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::{
        fs::{create_dir_all, write},
        time::Instant,
    };

    use {
        notify::{
            Event,
            event::{AccessKind, AccessMode, CreateKind, EventKind, ModifyKind, RenameMode},
        },
        tempfile::TempDir,
    };

    use crate::watch::{
        events::EventType,
        native::{RENAME_WINDOW, Translator},
    };

    fn rename(mode: RenameMode, tracker: usize) -> Event {
        Event::new(EventKind::Modify(ModifyKind::Name(mode))).set_tracker(tracker)
    }

    #[test]
    fn test_translate_create_and_access() {
        let mut translator = Translator::new(true);
        let now = Instant::now();

        let created = Event::new(EventKind::Create(CreateKind::Folder)).add_path("/data/dir".into());
        let events = translator.push(&created, now);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Created);
        assert!(events[0].is_directory);

        let closed = Event::new(EventKind::Access(AccessKind::Close(AccessMode::Write)))
            .add_path("/data/file.txt".into());
        assert_eq!(translator.push(&closed, now)[0].event_type, EventType::Closed);

        let opened = Event::new(EventKind::Access(AccessKind::Open(AccessMode::Any)))
            .add_path("/data/file.txt".into());
        assert_eq!(translator.push(&opened, now)[0].event_type, EventType::Opened);
    }

    #[test]
    fn test_rename_halves_yield_one_move() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("a.mkv");
        let new = dir.path().join("b.mkv");
        write(&new, b"x").unwrap();

        let mut translator = Translator::new(true);
        let now = Instant::now();
        let mut events = translator.push(&rename(RenameMode::From, 7).add_path(old.clone()), now);
        events.extend(translator.push(&rename(RenameMode::To, 7).add_path(new.clone()), now));
        events.extend(translator.push(
            &rename(RenameMode::Both, 7).add_path(old.clone()).add_path(new.clone()),
            now,
        ));
        events.extend(translator.expire(now + RENAME_WINDOW * 2));

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Moved);
        assert_eq!(events[0].source_path, old);
        assert_eq!(events[0].destination_path.as_deref(), Some(new.as_path()));
        assert!(!events[0].is_directory);
    }

    #[test]
    fn test_unpaired_rename_halves() {
        let mut translator = Translator::new(true);
        let now = Instant::now();

        let left = rename(RenameMode::From, 1).add_path("/data/left.mkv".into());
        assert!(translator.push(&left, now).is_empty());
        assert!(translator.expire(now + RENAME_WINDOW / 2).is_empty());

        let arrived = rename(RenameMode::To, 2).add_path("/data/arrived.mkv".into());
        let events = translator.push(&arrived, now);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Created);

        let expired = translator.expire(now + RENAME_WINDOW);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].event_type, EventType::Deleted);
        assert_eq!(expired[0].source_path.to_str(), Some("/data/left.mkv"));
        assert!(translator.expire(now + RENAME_WINDOW * 2).is_empty());
    }

    #[test]
    fn test_expired_half_precedes_next_event() {
        let mut translator = Translator::new(true);
        let now = Instant::now();
        translator.push(&rename(RenameMode::From, 3).add_path("/data/gone".into()), now);

        let created = Event::new(EventKind::Create(CreateKind::File)).add_path("/data/new".into());
        let events = translator.push(&created, now + RENAME_WINDOW);
        let kinds: Vec<_> = events.iter().map(|event| event.event_type).collect();
        assert_eq!(kinds, vec![EventType::Deleted, EventType::Created]);
    }

    #[test]
    fn test_untracked_both_is_a_move() {
        let mut translator = Translator::new(false);
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path("/data/a".into())
            .add_path("/data/b".into());
        let events = translator.push(&event, Instant::now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Moved);
    }

    #[test]
    fn test_directory_rename_adds_synthetic_moves() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("old");
        let new = dir.path().join("new");
        create_dir_all(new.join("sub")).unwrap();
        write(new.join("sub/file.txt"), b"x").unwrap();

        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(old.clone())
            .add_path(new.clone());
        let events = Translator::new(true).push(&event, Instant::now());

        assert_eq!(events[0].event_type, EventType::Moved);
        assert!(!events[0].is_synthetic);
        assert_eq!(events[0].destination_path.as_deref(), Some(new.as_path()));

        let synthetic: Vec<_> = events.iter().filter(|event| event.is_synthetic).collect();
        assert_eq!(synthetic.len(), 2);
        assert!(synthetic.iter().any(|event| event.source_path == old.join("sub/file.txt")
            && event.destination_path.as_deref() == Some(new.join("sub/file.txt").as_path())));

        assert_eq!(Translator::new(false).push(&event, Instant::now()).len(), 1);
    }

    #[test]
    fn test_translate_ignores_events_without_paths() {
        let event = Event::new(EventKind::Create(CreateKind::File));
        assert!(Translator::new(true).push(&event, Instant::now()).is_empty());
    }
}
