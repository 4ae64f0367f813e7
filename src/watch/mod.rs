//! Watches: one directory root, one change emitter, one conduit pipeline.
//!
//! Each watch runs on its own named worker thread. The emitter (polling or
//! native) hands events to the worker in detection order; the worker filters
//! them, dispatches each one through the pipeline and only then moves on.

use std::{
    fs::canonicalize,
    io::{Error as IoError, ErrorKind},
    path::{Path, PathBuf},
    thread::{Builder, JoinHandle},
    time::Duration,
};

use {
    serde::Deserialize,
    tracing::{debug, error, info},
};

use crate::{
    conduit::ConduitPipeline,
    error::domain::WatchError,
    watch::{
        events::ChangeEvent, filter::EventFilter, native::NativeEmitter,
        polling::{EmitterStatus, PollingEmitter}, stop::StopSignal,
    },
};

pub mod diff;
pub mod events;
pub mod filter;
pub mod native;
pub mod polling;
pub mod snapshot;
pub mod stop;
pub mod supervisor;

pub use supervisor::WatchSupervisor;

/// How a watch detects changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObserverKind {
    /// OS change notifications.
    #[default]
    Native,
    /// Periodic snapshots.
    Polling,
}

/// Emitter settings of one watch.
#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub root: PathBuf,
    pub recursive: bool,
    pub observer: ObserverKind,
    /// Polling period; unused by the native observer.
    pub interval: Duration,
}

/// Filters, dispatches and paces events on the worker thread.
struct Dispatcher {
    filter: EventFilter,
    pipeline: ConduitPipeline,
    stop: StopSignal,
}

impl Dispatcher {
    fn handle(&self, event: ChangeEvent) {
        if !self.filter.allows(&event) {
            return;
        }
        let report = self.pipeline.dispatch(&event);
        debug!(
            "{} {:?}: invoked {:?}, failed {:?}",
            event.event_type, event.source_path, report.invoked, report.failed
        );

        let pause = self.pipeline.event_interval();
        if !pause.is_zero() {
            self.stop.wait_timeout(pause);
        }
    }
}

/// A running watch.
#[derive(Debug)]
pub struct Watch {
    root: PathBuf,
    stop: StopSignal,
    status: Option<EmitterStatus>,
    native: Option<NativeEmitter>,
    worker: Option<JoinHandle<()>>,
}

impl Watch {
    /// Resolves the root and starts the worker thread.
    ///
    /// # Errors
    ///
    /// Returns `WatchError::RootUnresolvable` if the root cannot be
    /// canonicalized, `WatchError::Notify` if the native backend refuses the
    /// root, and `WatchError::Spawn` if the thread cannot be created.
    pub fn start(
        settings: WatchSettings,
        filter: EventFilter,
        pipeline: ConduitPipeline,
    ) -> Result<Self, WatchError> {
        let root = canonicalize(&settings.root).map_err(|source| WatchError::RootUnresolvable {
            path: settings.root.clone(),
            source,
        })?;
        if !root.is_dir() {
            return Err(WatchError::RootUnresolvable {
                path: settings.root,
                source: IoError::from(ErrorKind::NotADirectory),
            });
        }

        let stop = StopSignal::new();
        let dispatcher = Dispatcher {
            filter,
            pipeline,
            stop: stop.clone(),
        };
        let thread = Builder::new().name(format!("watch:{}", root.display()));

        let (status, native, worker) = match settings.observer {
            ObserverKind::Polling => {
                let emitter = PollingEmitter::new(
                    root.clone(),
                    settings.recursive,
                    settings.interval,
                    stop.clone(),
                );
                let status = emitter.status();
                let worker = thread
                    .spawn(move || emitter.run(|event| dispatcher.handle(event)))
                    .map_err(WatchError::Spawn)?;
                (Some(status), None, worker)
            }
            ObserverKind::Native => {
                let (emitter, receiver) =
                    NativeEmitter::new(&root, settings.recursive, stop.clone())?;
                let worker_stop = stop.clone();
                let worker = thread
                    .spawn(move || {
                        NativeEmitter::run(receiver, worker_stop, |event| dispatcher.handle(event))
                    })
                    .map_err(WatchError::Spawn)?;
                (None, Some(emitter), worker)
            }
        };

        info!("Watching: {:?} ({:?})", root, settings.observer);
        Ok(Self {
            root,
            stop,
            status,
            native,
            worker: Some(worker),
        })
    }

    /// Canonical root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Polling emitter state, if this watch polls.
    pub fn status(&self) -> Option<&EmitterStatus> {
        self.status.as_ref()
    }

    /// Blocks until changes made from now on will be observed.
    ///
    /// Native watches are ready as soon as they start.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        self.status
            .as_ref()
            .is_none_or(|status| status.wait_ready(timeout))
    }

    /// Asks the worker to finish after the event it is dispatching.
    pub fn stop(&self) {
        self.stop.stop();
        if let Some(native) = &self.native {
            native.close();
        }
    }

    /// Whether the worker thread is still alive.
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|worker| !worker.is_finished())
    }

    /// Waits for the worker thread to exit.
    pub fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Watch worker for {:?} panicked", self.root);
            }
            debug!("Watch stopped: {:?}", self.root);
        }
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs::{create_dir, rename, write},
        path::Path,
        sync::Arc,
        thread::sleep,
        time::{Duration, Instant},
    };

    use {parking_lot::Mutex, tempfile::TempDir};

    use crate::{
        conduit::{Conduit, ConduitBase, ConduitPipeline, PathMappings},
        error::domain::{ConduitError, WatchError},
        watch::{
            ObserverKind, Watch, WatchSettings,
            events::{ChangeEvent, EventType},
            filter::EventFilter,
        },
    };

    #[derive(Debug)]
    struct Recorder {
        base: ConduitBase,
        seen: Arc<Mutex<Vec<ChangeEvent>>>,
    }

    impl Conduit for Recorder {
        fn base(&self) -> &ConduitBase {
            &self.base
        }

        fn flow(&self, event: &ChangeEvent) -> Result<(), ConduitError> {
            self.seen.lock().push(event.clone());
            Ok(())
        }
    }

    fn recording_pipeline(seen: &Arc<Mutex<Vec<ChangeEvent>>>) -> ConduitPipeline {
        ConduitPipeline::new(
            vec![Box::new(Recorder {
                base: ConduitBase::new("recorder", [], 0, PathMappings::default()),
                seen: seen.clone(),
            })],
            Duration::ZERO,
        )
    }

    fn polling(root: &Path) -> WatchSettings {
        WatchSettings {
            root: root.to_path_buf(),
            recursive: true,
            observer: ObserverKind::Polling,
            interval: Duration::from_millis(50),
        }
    }

    fn wait_for(seen: &Arc<Mutex<Vec<ChangeEvent>>>, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while seen.lock().len() < count && Instant::now() < deadline {
            sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_missing_root_is_rejected() {
        let dir = TempDir::new().unwrap();
        let result = Watch::start(
            polling(&dir.path().join("absent")),
            EventFilter::default(),
            ConduitPipeline::default(),
        );
        assert!(matches!(result, Err(WatchError::RootUnresolvable { .. })));
    }

    #[test]
    fn test_file_root_is_rejected() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file");
        write(&file, b"x").unwrap();
        let result = Watch::start(polling(&file), EventFilter::default(), ConduitPipeline::default());
        assert!(matches!(result, Err(WatchError::RootUnresolvable { .. })));
    }

    #[test]
    fn test_polling_watch_filters_and_dispatches() {
        let dir = TempDir::new().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let filter = EventFilter::new(&["*.mkv".to_string()], &[], true, false).unwrap();
        let mut watch = Watch::start(polling(dir.path()), filter, recording_pipeline(&seen)).unwrap();
        assert!(watch.wait_ready(Duration::from_secs(10)));

        // Files are completed outside the tree and renamed in, so a poll
        // never sees them half written.
        let staging = TempDir::new_in(dir.path().parent().unwrap()).unwrap();
        write(staging.path().join("episode.MKV"), b"x").unwrap();
        write(staging.path().join("notes.txt"), b"x").unwrap();
        create_dir(dir.path().join("season")).unwrap();
        rename(staging.path().join("episode.MKV"), dir.path().join("season/episode.MKV")).unwrap();
        rename(staging.path().join("notes.txt"), dir.path().join("notes.txt")).unwrap();
        wait_for(&seen, 1);

        watch.stop();
        watch.join();
        assert!(!watch.is_running());

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].event_type, EventType::Created);
        assert!(seen[0].source_path.ends_with("season/episode.MKV"));
    }

    #[test]
    fn test_stop_ends_native_watch() {
        let dir = TempDir::new().unwrap();
        let mut watch = Watch::start(
            WatchSettings {
                root: dir.path().to_path_buf(),
                recursive: false,
                observer: ObserverKind::Native,
                interval: Duration::from_secs(1),
            },
            EventFilter::default(),
            ConduitPipeline::default(),
        )
        .unwrap();
        assert!(watch.wait_ready(Duration::ZERO));
        assert!(watch.is_running());

        watch.stop();
        watch.join();
        assert!(!watch.is_running());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_native_rename_dispatches_one_move() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        write(root.join("a.mkv"), b"x").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut watch = Watch::start(
            WatchSettings {
                root: root.clone(),
                recursive: true,
                observer: ObserverKind::Native,
                interval: Duration::from_secs(1),
            },
            EventFilter::default(),
            recording_pipeline(&seen),
        )
        .unwrap();

        rename(root.join("a.mkv"), root.join("b.mkv")).unwrap();
        wait_for(&seen, 1);
        // Long enough for an unpaired half to have expired.
        sleep(crate::watch::native::RENAME_WINDOW * 3);

        watch.stop();
        watch.join();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1, "{seen:?}");
        assert_eq!(seen[0].event_type, EventType::Moved);
        assert_eq!(seen[0].source_path, root.join("a.mkv"));
        assert_eq!(seen[0].destination_path.as_deref(), Some(root.join("b.mkv").as_path()));
    }
}
