//! Filesystem change event definitions.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::error::domain::ConfigError;

/// Kind of filesystem change carried by a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Created,
    Modified,
    Deleted,
    Moved,
    Closed,
    Opened,
}

impl EventType {
    /// Every event type, the default subscription of a conduit.
    pub const ALL: [EventType; 6] = [
        EventType::Moved,
        EventType::Created,
        EventType::Deleted,
        EventType::Modified,
        EventType::Closed,
        EventType::Opened,
    ];

    /// Lowercase name used in configuration, logs and shell arguments.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Created => "created",
            EventType::Modified => "modified",
            EventType::Deleted => "deleted",
            EventType::Moved => "moved",
            EventType::Closed => "closed",
            EventType::Opened => "opened",
        }
    }
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim())
            .ok_or_else(|| ConfigError::UnknownEventType {
                name: s.to_string(),
            })
    }
}

/// One detected filesystem change.
///
/// Events are created by an emitter, handed to the pipeline once and never
/// mutated by conduits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// What happened.
    pub event_type: EventType,
    /// Whether the affected entry is a directory.
    pub is_directory: bool,
    /// Absolute path of the affected entry.
    pub source_path: PathBuf,
    /// New location of the entry; only meaningful for `moved`.
    pub destination_path: Option<PathBuf>,
    /// Whether the event was inferred rather than reported by the detector.
    pub is_synthetic: bool,
}

impl ChangeEvent {
    /// Creates a non-move event.
    pub fn new(event_type: EventType, is_directory: bool, source_path: impl Into<PathBuf>) -> Self {
        Self {
            event_type,
            is_directory,
            source_path: source_path.into(),
            destination_path: None,
            is_synthetic: false,
        }
    }

    /// Creates a `moved` event.
    pub fn moved(
        is_directory: bool,
        source_path: impl Into<PathBuf>,
        destination_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            event_type: EventType::Moved,
            is_directory,
            source_path: source_path.into(),
            destination_path: Some(destination_path.into()),
            is_synthetic: false,
        }
    }

    /// Marks the event as inferred.
    #[must_use]
    pub fn synthetic(mut self) -> Self {
        self.is_synthetic = true;
        self
    }

    /// Paths touched by the event: the source, then the destination of a move.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.source_path.as_path()).chain(self.destination_path.as_deref())
    }

    /// Source path as a string, lossily converted.
    pub fn source_str(&self) -> String {
        self.source_path.to_string_lossy().into_owned()
    }

    /// Destination path as a string; empty when there is none.
    pub fn destination_str(&self) -> String {
        self.destination_path
            .as_deref()
            .map(|path| path.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use crate::watch::events::{ChangeEvent, EventType};

    #[test]
    fn test_event_type_parsing() {
        assert_eq!("created".parse::<EventType>().unwrap(), EventType::Created);
        assert_eq!(" moved ".parse::<EventType>().unwrap(), EventType::Moved);
        assert!("touched".parse::<EventType>().is_err());
        assert!("Created".parse::<EventType>().is_err());
    }

    #[test]
    fn test_event_type_names_round_trip_through_display() {
        for kind in EventType::ALL {
            assert_eq!(kind.to_string().parse::<EventType>().unwrap(), kind);
        }
    }

    #[test]
    fn test_moved_event_paths() {
        let event = ChangeEvent::moved(false, "/data/a.txt", "/data/b.txt");
        let paths: Vec<&Path> = event.paths().collect();
        assert_eq!(paths, vec![Path::new("/data/a.txt"), Path::new("/data/b.txt")]);
        assert_eq!(event.destination_str(), "/data/b.txt");

        let created = ChangeEvent::new(EventType::Created, true, "/data/dir");
        assert_eq!(created.paths().count(), 1);
        assert_eq!(created.destination_str(), "");
        assert!(!created.is_synthetic);
        assert!(created.synthetic().is_synthetic);
    }
}
