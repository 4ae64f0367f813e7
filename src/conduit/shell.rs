//! Shell command conduit.
//!
//! Runs a command template with the event appended as four arguments:
//! event type, `directory` or `file`, source path and destination path
//! (empty when the event has none).

use std::{
    collections::HashSet,
    process::{Child, Command},
    sync::Arc,
    thread,
};

use {
    parking_lot::Mutex,
    serde::Deserialize,
    tracing::{debug, error, info, warn},
};

use crate::{
    conduit::{Conduit, ConduitBase},
    error::domain::{ConduitError, ConfigError},
    watch::events::ChangeEvent,
};

fn default_true() -> bool {
    true
}

/// Settings of the `shell` conduit.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShellSettings {
    pub command: String,
    /// Block the watch until the command exits.
    #[serde(default = "default_true")]
    pub wait_for_process: bool,
    /// Skip events while a previously launched command is still running.
    #[serde(default = "default_true")]
    pub drop_during_process: bool,
}

/// Launches a child process per event.
#[derive(Debug)]
pub struct ShellCommandConduit {
    base: ConduitBase,
    command: Vec<String>,
    wait_for_process: bool,
    drop_during_process: bool,
    in_flight: Arc<Mutex<HashSet<u32>>>,
}

impl ShellCommandConduit {
    /// Creates the conduit.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the command is empty or badly quoted.
    pub fn new(base: ConduitBase, settings: &ShellSettings) -> Result<Self, ConfigError> {
        let command = split_command(&settings.command)?;
        if command.is_empty() {
            return Err(ConfigError::missing_field("command"));
        }
        Ok(Self {
            base,
            command,
            wait_for_process: settings.wait_for_process,
            drop_during_process: settings.drop_during_process,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Whether a detached child launched by this conduit is still running.
    pub fn is_process_running(&self) -> bool {
        !self.in_flight.lock().is_empty()
    }

    /// Number of detached children still running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    fn arguments(&self, event: &ChangeEvent) -> Vec<String> {
        let mut parts = self.command.clone();
        parts.push(event.event_type.to_string());
        parts.push(if event.is_directory { "directory" } else { "file" }.to_string());
        parts.push(event.source_str());
        parts.push(event.destination_str());
        parts
    }

    fn detach(&self, mut child: Child, parts: Vec<String>) -> Result<(), ConduitError> {
        let pid = child.id();
        self.in_flight.lock().insert(pid);

        let in_flight = self.in_flight.clone();
        let command = parts.clone();
        let spawned = thread::Builder::new()
            .name(format!("process-watcher-{pid}"))
            .spawn(move || {
                match child.wait() {
                    Ok(status) if !status.success() => warn!("{:?} exited with {}", command, status),
                    Ok(_) => debug!("{:?} finished", command),
                    Err(e) => error!("Failed to wait for {:?}: {}", command, e),
                }
                in_flight.lock().remove(&pid);
            });

        if let Err(source) = spawned {
            self.in_flight.lock().remove(&pid);
            return Err(ConduitError::Process {
                command: parts,
                source,
            });
        }
        Ok(())
    }
}

impl Conduit for ShellCommandConduit {
    fn base(&self) -> &ConduitBase {
        &self.base
    }

    fn flow(&self, event: &ChangeEvent) -> Result<(), ConduitError> {
        if self.drop_during_process && self.is_process_running() {
            debug!("Already running: {:?}", self.in_flight.lock());
            return Ok(());
        }

        let parts = self.arguments(event);
        info!("Command: {:?}", parts);
        let (program, args) = parts
            .split_first()
            .ok_or_else(|| ConfigError::missing_field("command"))?;

        let mut child = Command::new(program)
            .args(args)
            .spawn()
            .map_err(|source| ConduitError::Process {
                command: parts.clone(),
                source,
            })?;

        if !self.wait_for_process {
            return self.detach(child, parts);
        }

        let status = child.wait().map_err(|source| ConduitError::Process {
            command: parts.clone(),
            source,
        })?;
        if !status.success() {
            warn!("{:?} exited with {}", parts, status);
        }
        Ok(())
    }
}

/// Splits a command line into words using POSIX shell quoting rules.
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` for an unterminated quote or a
/// trailing backslash.
pub fn split_command(line: &str) -> Result<Vec<String>, ConfigError> {
    shlex::split(line)
        .ok_or_else(|| ConfigError::invalid_value(format!("unbalanced quoting in {line:?}")))
}
