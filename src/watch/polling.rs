//! Polling emitter: periodic snapshot, diff and emit.

use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use {
    parking_lot::{Condvar, Mutex},
    tracing::{debug, error, info},
};

use crate::{
    error::domain::SnapshotError,
    watch::{diff::SnapshotDiff, events::ChangeEvent, snapshot::DirectorySnapshot, stop::StopSignal},
};

/// Lifecycle of a polling emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterState {
    /// Created, worker not running yet.
    Idle,
    /// Walking the tree.
    Snapshotting,
    /// Baseline established, waiting for the next tick.
    Ready,
    /// Baseline walk failed; it is retried on the next tick.
    Failed,
    /// Comparing the fresh snapshot with the previous one.
    Diffing,
    /// Stop observed, leaving the loop.
    Stopping,
    /// Worker finished.
    Stopped,
}

/// Observable emitter state shared with the owning watch.
#[derive(Debug, Clone)]
pub struct EmitterStatus {
    inner: Arc<(Mutex<EmitterState>, Condvar)>,
}

impl Default for EmitterStatus {
    fn default() -> Self {
        Self {
            inner: Arc::new((Mutex::new(EmitterState::Idle), Condvar::new())),
        }
    }
}

impl EmitterStatus {
    /// Current state.
    pub fn get(&self) -> EmitterState {
        *self.inner.0.lock()
    }

    fn set(&self, state: EmitterState) {
        let (lock, changed) = &*self.inner;
        *lock.lock() = state;
        changed.notify_all();
    }

    /// Blocks until the baseline is established, has failed, or the worker
    /// has ended.
    ///
    /// # Returns
    ///
    /// `true` if the emitter reached a ready state within `timeout`.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (lock, changed) = &*self.inner;
        let mut state = lock.lock();
        loop {
            match *state {
                EmitterState::Ready | EmitterState::Diffing => return true,
                EmitterState::Failed | EmitterState::Stopping | EmitterState::Stopped => {
                    return false;
                }
                EmitterState::Idle | EmitterState::Snapshotting => {}
            }
            if changed.wait_until(&mut state, deadline).timed_out() {
                return matches!(*state, EmitterState::Ready | EmitterState::Diffing);
            }
        }
    }
}

/// Per-watch worker that detects changes by repeated snapshots.
///
/// The emitter owns its snapshot exclusively. Each cycle takes a new
/// snapshot, diffs it against the stored one and swaps it in.
#[derive(Debug)]
pub struct PollingEmitter {
    root: PathBuf,
    recursive: bool,
    interval: Duration,
    stop: StopSignal,
    status: EmitterStatus,
    snapshot: Option<DirectorySnapshot>,
}

impl PollingEmitter {
    /// Creates an idle emitter for `root`.
    pub fn new(root: PathBuf, recursive: bool, interval: Duration, stop: StopSignal) -> Self {
        Self {
            root,
            recursive,
            interval,
            stop,
            status: EmitterStatus::default(),
            snapshot: None,
        }
    }

    /// Handle for observing the emitter state from another thread.
    pub fn status(&self) -> EmitterStatus {
        self.status.clone()
    }

    fn take_snapshot(&self) -> Result<DirectorySnapshot, SnapshotError> {
        DirectorySnapshot::take(&self.root, self.recursive, &self.stop)
    }

    /// Takes the baseline snapshot.
    ///
    /// Changes made before this returns are not observable.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotError` if the walk fails; the state is then `Failed`.
    pub fn establish_baseline(&mut self) -> Result<(), SnapshotError> {
        info!("Take first snapshot: {:?}", self.root);
        self.status.set(EmitterState::Snapshotting);
        let snapshot = match self.take_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.status.set(EmitterState::Failed);
                return Err(e);
            }
        };
        info!("{} directories and files: {:?}", snapshot.len(), self.root);
        self.snapshot = Some(snapshot);
        self.status.set(EmitterState::Ready);
        Ok(())
    }

    /// Runs one snapshot-and-diff cycle.
    ///
    /// A walk cut short by the stop signal yields no events and leaves the
    /// stored snapshot untouched, so a partial tree never shows up as
    /// deletions.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotError` if the walk fails; the stored snapshot is kept.
    pub fn poll(&mut self) -> Result<Vec<ChangeEvent>, SnapshotError> {
        let Some(previous) = self.snapshot.as_ref() else {
            self.establish_baseline()?;
            return Ok(Vec::new());
        };

        self.status.set(EmitterState::Snapshotting);
        let current = match self.take_snapshot() {
            Ok(current) => current,
            Err(e) => {
                self.status.set(EmitterState::Ready);
                return Err(e);
            }
        };
        if self.stop.is_stopped() {
            return Ok(Vec::new());
        }

        self.status.set(EmitterState::Diffing);
        let events = SnapshotDiff::between(previous, &current).into_events();
        self.snapshot = Some(current);
        self.status.set(EmitterState::Ready);
        Ok(events)
    }

    /// Runs the polling loop until the stop signal is raised.
    ///
    /// Every detected change is handed to `emit` in detection order; the
    /// next cycle starts only after `emit` returned for every event.
    pub fn run(mut self, mut emit: impl FnMut(ChangeEvent)) {
        if let Err(e) = self.establish_baseline() {
            error!("Baseline snapshot failed for {:?}: {}", self.root, e);
        }

        while !self.stop.wait_timeout(self.interval) {
            match self.poll() {
                Ok(events) => {
                    if !events.is_empty() {
                        debug!("{} changes detected under {:?}", events.len(), self.root);
                    }
                    for event in events {
                        if self.stop.is_stopped() {
                            break;
                        }
                        emit(event);
                    }
                }
                Err(e) => error!("Snapshot failed for {:?}: {}", self.root, e),
            }
        }

        self.status.set(EmitterState::Stopping);
        debug!("Polling emitter stopping: {:?}", self.root);
        self.status.set(EmitterState::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs::{create_dir, remove_dir, write},
        time::{Duration, Instant},
    };

    use tempfile::TempDir;

    use crate::watch::{
        events::EventType,
        polling::{EmitterState, PollingEmitter},
        stop::StopSignal,
    };

    #[test]
    fn test_baseline_moves_emitter_to_ready() {
        let dir = TempDir::new().unwrap();
        let mut emitter = PollingEmitter::new(
            dir.path().to_path_buf(),
            true,
            Duration::from_millis(10),
            StopSignal::new(),
        );
        let status = emitter.status();
        assert_eq!(status.get(), EmitterState::Idle);

        emitter.establish_baseline().unwrap();
        assert_eq!(status.get(), EmitterState::Ready);
        assert!(status.wait_ready(Duration::from_millis(1)));
    }

    #[test]
    fn test_failed_baseline_is_reported() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        create_dir(&root).unwrap();
        let mut emitter =
            PollingEmitter::new(root.clone(), true, Duration::from_millis(10), StopSignal::new());
        let status = emitter.status();
        remove_dir(&root).unwrap();

        assert!(emitter.establish_baseline().is_err());
        assert_eq!(status.get(), EmitterState::Failed);
        let started = Instant::now();
        assert!(!status.wait_ready(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(5));

        // The next tick retries once the root is back.
        create_dir(&root).unwrap();
        assert!(emitter.poll().unwrap().is_empty());
        assert_eq!(status.get(), EmitterState::Ready);
    }

    #[test]
    fn test_poll_reports_new_file() {
        let dir = TempDir::new().unwrap();
        let mut emitter = PollingEmitter::new(
            dir.path().to_path_buf(),
            true,
            Duration::from_millis(10),
            StopSignal::new(),
        );
        emitter.establish_baseline().unwrap();

        write(dir.path().join("new.txt"), b"new").unwrap();
        let events = emitter.poll().unwrap();
        assert!(events.iter().any(|event| event.event_type == EventType::Created
            && event.source_path == dir.path().join("new.txt")
            && !event.is_directory));

        // The snapshot was swapped in, so the same change is not reported twice.
        let again = emitter.poll().unwrap();
        assert!(again.iter().all(|event| event.source_path != dir.path().join("new.txt")));
    }

    #[test]
    fn test_poll_after_stop_emits_nothing() {
        let dir = TempDir::new().unwrap();
        let stop = StopSignal::new();
        let mut emitter =
            PollingEmitter::new(dir.path().to_path_buf(), true, Duration::from_millis(10), stop.clone());
        emitter.establish_baseline().unwrap();

        write(dir.path().join("late.txt"), b"late").unwrap();
        stop.stop();
        assert!(emitter.poll().unwrap().is_empty());
    }

    #[test]
    fn test_run_exits_on_stop() {
        let dir = TempDir::new().unwrap();
        let stop = StopSignal::new();
        let emitter =
            PollingEmitter::new(dir.path().to_path_buf(), true, Duration::from_secs(60), stop.clone());
        let status = emitter.status();

        let handle = std::thread::spawn(move || emitter.run(|_| {}));
        assert!(status.wait_ready(Duration::from_secs(10)));
        stop.stop();
        handle.join().unwrap();
        assert_eq!(status.get(), EmitterState::Stopped);
    }
}
