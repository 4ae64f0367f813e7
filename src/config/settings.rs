//! Watch-file model.
//!
//! A watch file is a YAML document naming the observer to use and a list of
//! watches, each with its directories, filters and conduits. Conduit
//! entries are kept as raw YAML until the registry builds them, so one bad
//! entry never prevents its siblings from loading.

use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
    time::Duration,
};

use {
    serde::Deserialize,
    serde_yaml::{Mapping, Value, from_str, from_value},
    tracing::debug,
};

use crate::{
    conduit::{MappingSpec, PathMappings},
    error::domain::ConfigError,
    watch::{ObserverKind, events::EventType},
};

fn default_interval() -> f64 {
    1.0
}

/// Top-level document of a watch file.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchFile {
    /// Observer used by every watch in the file.
    #[serde(default)]
    pub observer: ObserverKind,
    /// Polling period in seconds.
    #[serde(default = "default_interval")]
    pub interval: f64,
    #[serde(alias = "tricks")]
    pub watches: Vec<WatchSpec>,
}

impl WatchFile {
    /// Polling period as a `Duration`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for negative or non-finite values.
    pub fn interval(&self) -> Result<Duration, ConfigError> {
        seconds("interval", self.interval)
    }
}

/// One watch: directories, filters and the conduits fed by them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WatchSpec {
    /// Roots to watch; empty means the watch file's own directory.
    pub dirs: Vec<PathBuf>,
    pub recursive: bool,
    /// Pause after each dispatched event, in seconds.
    pub event_interval: f64,
    pub patterns: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub ignore_directories: bool,
    pub case_sensitive: bool,
    /// Raw conduit entries, parsed one by one with [`ConduitEntry::from_value`].
    pub conduits: Vec<Value>,
}

impl WatchSpec {
    /// Pacing delay as a `Duration`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for negative or non-finite values.
    pub fn event_interval(&self) -> Result<Duration, ConfigError> {
        seconds("event_interval", self.event_interval)
    }

    /// Roots of this watch, defaulting to `base_dir`.
    pub fn roots(&self, base_dir: &Path) -> Vec<PathBuf> {
        if self.dirs.is_empty() {
            vec![base_dir.to_path_buf()]
        } else {
            self.dirs.clone()
        }
    }
}

/// A conduit entry split into its common fields and its variant settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ConduitEntry {
    pub name: String,
    /// Registry identifier of the variant.
    pub class: String,
    pub priority: i64,
    /// Subscribed event types; empty means all of them.
    pub events: Vec<EventType>,
    pub mappings: PathMappings,
    /// Every remaining key, handed to the variant's factory.
    pub settings: Mapping,
}

impl ConduitEntry {
    /// Splits a raw YAML entry.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when `name` or `class` is missing, an event type
    /// is unknown, or `priority` or `mappings` is malformed.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let Value::Mapping(mut map) = value else {
            return Err(ConfigError::invalid_value("conduit entry is not a mapping"));
        };

        let name = take_string(&mut map, "name")?;
        let class = take_string(&mut map, "class")?;
        let priority = match take(&mut map, "priority") {
            Some(value) => from_value(value)?,
            None => 0,
        };
        let events = match take(&mut map, "events") {
            Some(value) => from_value::<Vec<String>>(value)?
                .iter()
                .map(|name| name.parse())
                .collect::<Result<Vec<EventType>, _>>()?,
            None => Vec::new(),
        };
        let mappings = match take(&mut map, "mappings") {
            Some(value) => PathMappings::from_spec(&from_value::<MappingSpec>(value)?)?,
            None => PathMappings::default(),
        };

        Ok(Self {
            name,
            class,
            priority,
            events,
            mappings,
            settings: map,
        })
    }
}

/// Removes `key`, treating an explicit null as absent.
fn take(map: &mut Mapping, key: &str) -> Option<Value> {
    map.remove(key).filter(|value| !value.is_null())
}

fn take_string(map: &mut Mapping, key: &str) -> Result<String, ConfigError> {
    match take(map, key) {
        Some(Value::String(text)) if !text.trim().is_empty() => Ok(text.trim().to_string()),
        _ => Err(ConfigError::missing_field(key)),
    }
}

fn seconds(field: &str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| ConfigError::invalid_value(format!("{field} = {value}: {e}")))
}

/// Reads and parses a watch file.
///
/// # Errors
///
/// Returns `ConfigError::Io` if the file cannot be read and
/// `ConfigError::Yaml` if it is not a valid watch document.
pub fn load_watch_file(path: &Path) -> Result<WatchFile, ConfigError> {
    debug!("Loading watch file {:?}", path);
    let contents = read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(from_str(&contents)?)
}

/// Directory used for watches that name no `dirs`.
pub fn watch_file_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
