//! conduitwatch - filesystem change fan-out
//!
//! Watches directory trees, either through OS notifications or by polling
//! inode-aware snapshots, and hands every change to a priority-ordered set of
//! conduits: remote metadata-cache refreshers, media-library rescans,
//! webhooks and shell commands. Each watch runs on its own worker thread and
//! each conduit fails in isolation.

pub mod conduit;
pub mod config;
pub mod error;
pub mod watch;

// Re-export key types for convenience
pub use {
    conduit::{Conduit, ConduitBase, ConduitPipeline, ConduitRegistry, PathMappings, map_path},
    config::{LoggingConfig, WatchFile, init_logging, load_watch_file},
    error::{ConduitError, ConfigError, SnapshotError, WatchError},
    watch::{
        ObserverKind, Watch, WatchSettings, WatchSupervisor,
        events::{ChangeEvent, EventType},
        snapshot::DirectorySnapshot,
    },
};
