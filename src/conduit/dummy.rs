//! No-op conduit, useful for checking that a watch sees what you expect.

use {serde::Deserialize, tracing::info};

use crate::{
    conduit::{Conduit, ConduitBase},
    error::domain::ConduitError,
    watch::events::ChangeEvent,
};

/// The `dummy` conduit accepts no settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DummySettings {}

/// Logs each event and does nothing else.
#[derive(Debug)]
pub struct DummyConduit {
    base: ConduitBase,
}

impl DummyConduit {
    pub fn new(base: ConduitBase) -> Self {
        Self { base }
    }
}

impl Conduit for DummyConduit {
    fn base(&self) -> &ConduitBase {
        &self.base
    }

    fn flow(&self, event: &ChangeEvent) -> Result<(), ConduitError> {
        info!(
            "{}: {} {:?} -> {:?}",
            self.base.name, event.event_type, event.source_path, event.destination_path
        );
        Ok(())
    }
}
