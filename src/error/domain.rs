//! Domain-specific error types using `thiserror`.
//!
//! This module defines the main error enums for the different areas of
//! conduitwatch: directory snapshots, watches, conduits and configuration.

use std::{io::Error as IoError, path::PathBuf};

use {reqwest::Error as ReqwestError, serde_yaml::Error as YamlError, thiserror::Error};

/// Errors that abort a directory snapshot walk.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// An OS-level error that is not a tolerated race.
    #[error("Failed to snapshot {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: IoError,
    },
}

/// Watch lifecycle errors.
#[derive(Error, Debug)]
pub enum WatchError {
    /// The watch root could not be resolved to an existing directory.
    #[error("Cannot resolve watch root {path:?}: {source}")]
    RootUnresolvable {
        path: PathBuf,
        #[source]
        source: IoError,
    },
    /// The native notification backend failed.
    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),
    /// The worker thread could not be spawned.
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] IoError),
}

/// Configuration errors for watch files and conduit entries.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The watch file could not be read.
    #[error("Cannot read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: IoError,
    },
    /// The YAML document is malformed or does not match the expected shape.
    #[error("YAML error: {0}")]
    Yaml(#[from] YamlError),
    /// A required field is missing or empty.
    #[error("Missing required field: {field}")]
    MissingField { field: String },
    /// An event type name is not one of the six known types.
    #[error("Unknown event type: {name}")]
    UnknownEventType { name: String },
    /// The conduit class is not registered.
    #[error("Unknown conduit class: {class}")]
    UnknownVariant { class: String },
    /// A path mapping line has no `from:to` separator.
    #[error("Invalid path mapping: {line:?}")]
    InvalidMapping { line: String },
    /// Any other invalid value.
    #[error("Invalid value: {reason}")]
    InvalidValue { reason: String },
}

/// Failures raised by a conduit's `flow`.
#[derive(Error, Debug)]
pub enum ConduitError {
    /// Transport-level HTTP error (connect, timeout, TLS, ...).
    #[error("HTTP error: {0}")]
    Http(#[from] ReqwestError),
    /// The remote service answered with a non-success status.
    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    /// The response did not have the shape the conduit relies on.
    #[error("Unexpected response: {reason}")]
    UnexpectedResponse { reason: String },
    /// A child process could not be launched or awaited.
    #[error("Process error for {command:?}: {source}")]
    Process {
        command: Vec<String>,
        #[source]
        source: IoError,
    },
    /// The conduit panicked while handling an event.
    #[error("Conduit panicked: {reason}")]
    Panicked { reason: String },
    /// Invalid conduit configuration detected at flow time.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ConfigError {
    /// Creates a new `MissingField` error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Creates a new `InvalidValue` error.
    pub fn invalid_value(reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            reason: reason.into(),
        }
    }
}

impl ConduitError {
    /// Creates a new `UnexpectedResponse` error.
    pub fn unexpected(reason: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            reason: reason.into(),
        }
    }
}
