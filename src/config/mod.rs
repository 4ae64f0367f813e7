//! Watch-file configuration and logging setup.
//!
//! `settings` models the YAML watch files; `logging` installs the tracing
//! subscriber the binary uses.

pub mod logging;
pub mod settings;

pub use {
    logging::{LoggingConfig, init_logging},
    settings::{ConduitEntry, WatchFile, WatchSpec, load_watch_file},
};
