//! Loads watch files and owns every running watch.
//!
//! Files are isolated from each other: a file that cannot be read, parsed or
//! started is reported and skipped, and watches already started for it are
//! stopped again. Within a file, a bad conduit entry only drops that entry.

use std::path::{Path, PathBuf};

use {
    anyhow::Result,
    tracing::{error, info, warn},
};

use crate::{
    conduit::{Conduit, ConduitPipeline, ConduitRegistry},
    config::settings::{ConduitEntry, WatchSpec, load_watch_file, watch_file_dir},
    error::operational::{ErrorReporter, ResultExt},
    watch::{Watch, WatchSettings, filter::EventFilter},
};

/// Every watch started from the loaded files.
#[derive(Debug)]
pub struct WatchSupervisor {
    registry: ConduitRegistry,
    watches: Vec<Watch>,
}

impl WatchSupervisor {
    /// Creates a supervisor building conduits from `registry`.
    pub fn new(registry: ConduitRegistry) -> Self {
        Self {
            registry,
            watches: Vec::new(),
        }
    }

    /// Loads every file, reporting and skipping those that fail.
    ///
    /// # Returns
    ///
    /// The number of watches started.
    pub fn load_files(&mut self, paths: &[PathBuf]) -> usize {
        paths
            .iter()
            .map(|path| match self.load_file(path) {
                Ok(started) => started,
                Err(e) => {
                    ErrorReporter::error(&e, &format!("Skipping watch file {}", path.display()));
                    0
                }
            })
            .sum()
    }

    /// Loads one watch file and starts its watches.
    ///
    /// # Returns
    ///
    /// The number of watches started.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, if one of its
    /// roots cannot be resolved, or if a watch fails to start. Nothing from
    /// the file keeps running in that case.
    pub fn load_file(&mut self, path: &Path) -> Result<usize> {
        let file = load_watch_file(path).add_contextf(format!("Failed to load {path:?}"))?;
        let interval = file.interval()?;
        let base_dir = watch_file_dir(path);
        info!("{:?} observer selected for {:?}", file.observer, path);

        let mut started = Vec::new();
        for spec in &file.watches {
            let filter = EventFilter::new(
                &spec.patterns,
                &spec.ignore_patterns,
                spec.ignore_directories,
                spec.case_sensitive,
            )?;
            for root in spec.roots(&base_dir) {
                let settings = WatchSettings {
                    root,
                    recursive: spec.recursive,
                    observer: file.observer,
                    interval,
                };
                // Dropping `started` on error stops and joins what already runs.
                let pipeline = self.build_pipeline(spec)?;
                let watch = Watch::start(settings, filter.clone(), pipeline)
                    .add_contextf(format!("Failed to start a watch from {path:?}"))?;
                started.push(watch);
            }
        }

        let count = started.len();
        self.watches.extend(started);
        Ok(count)
    }

    /// Builds a pipeline, skipping conduit entries that fail to build.
    fn build_pipeline(&self, spec: &WatchSpec) -> Result<ConduitPipeline> {
        let conduits: Vec<Box<dyn Conduit>> = spec
            .conduits
            .iter()
            .filter_map(|raw| {
                match ConduitEntry::from_value(raw.clone()).and_then(|entry| self.registry.build(entry)) {
                    Ok(conduit) => Some(conduit),
                    Err(e) => {
                        error!(error = %ErrorReporter::chain(&e), "Skipping conduit entry {:?}", raw);
                        None
                    }
                }
            })
            .collect();
        if conduits.is_empty() {
            warn!("Watch has no usable conduits: {:?}", spec.dirs);
        }
        Ok(ConduitPipeline::new(conduits, spec.event_interval()?))
    }

    /// Number of running watches.
    pub fn len(&self) -> usize {
        self.watches.len()
    }

    /// Whether no watch is running.
    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    /// The running watches.
    pub fn watches(&self) -> &[Watch] {
        &self.watches
    }

    /// Raises every watch's stop signal without waiting.
    pub fn stop_all(&self) {
        for watch in &self.watches {
            watch.stop();
        }
    }

    /// Waits for every worker thread to exit.
    pub fn join_all(&mut self) {
        for watch in &mut self.watches {
            watch.join();
        }
    }

    /// Stops and joins every watch.
    pub fn shutdown(mut self) {
        self.stop_all();
        self.join_all();
        info!("All {} watches stopped", self.watches.len());
    }
}
