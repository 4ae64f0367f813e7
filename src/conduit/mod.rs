//! Conduits: downstream actions triggered by change events.
//!
//! A conduit receives every event its watch dispatches whose type it
//! subscribes to. Conduits run sequentially on the watch worker thread and
//! report failures through `ConduitError`; the pipeline isolates each one
//! from the others.

use std::{collections::BTreeSet, fmt::Debug};

use crate::{
    error::domain::ConduitError,
    watch::events::{ChangeEvent, EventType},
};

pub mod discord;
pub mod dummy;
pub mod http;
pub mod mapping;
pub mod pipeline;
pub mod plex;
pub mod plexmate;
pub mod rclone;
pub mod registry;
pub mod shell;

pub use {
    mapping::{MappingSpec, PathMappings, map_path},
    pipeline::{ConduitPipeline, DispatchReport},
    registry::{ConduitFactory, ConduitRegistry},
};

/// Settings every conduit carries regardless of its variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConduitBase {
    /// Unique label used in logs.
    pub name: String,
    /// Event types this conduit is invoked for.
    pub events: BTreeSet<EventType>,
    /// Higher runs first.
    pub priority: i64,
    /// Local-to-target path rewriting.
    pub mappings: PathMappings,
}

impl ConduitBase {
    /// Creates a base; an empty `events` list subscribes to every type.
    pub fn new(
        name: impl Into<String>,
        events: impl IntoIterator<Item = EventType>,
        priority: i64,
        mappings: PathMappings,
    ) -> Self {
        let mut events: BTreeSet<EventType> = events.into_iter().collect();
        if events.is_empty() {
            events.extend(EventType::ALL);
        }
        Self {
            name: name.into(),
            events,
            priority,
            mappings,
        }
    }

    /// Whether the conduit subscribes to `event_type`.
    pub fn accepts(&self, event_type: EventType) -> bool {
        self.events.contains(&event_type)
    }

    /// Maps a local path into this conduit's target namespace.
    pub fn map_path(&self, local: &str) -> String {
        self.mappings.apply(local)
    }
}

/// A configured action run for matching change events.
pub trait Conduit: Debug + Send {
    /// Shared settings.
    fn base(&self) -> &ConduitBase;

    /// Handles one event.
    ///
    /// # Errors
    ///
    /// Returns `ConduitError` when the external call or process fails.
    fn flow(&self, event: &ChangeEvent) -> Result<(), ConduitError>;

    /// The conduit's label.
    fn name(&self) -> &str {
        &self.base().name
    }
}
