//! Error handling built on `thiserror` and `anyhow`.
//!
//! Domain enums describe failures precisely where callers branch on them;
//! the operational helpers add context for failures that are only reported.

pub mod domain;
pub mod operational;

pub use {
    domain::{ConduitError, ConfigError, SnapshotError, WatchError},
    operational::{ErrorReporter, ResultExt},
};
