//! Priority-ordered, fault-isolated dispatch of events to conduits.

use std::{
    any::Any,
    cmp::Reverse,
    panic::{AssertUnwindSafe, catch_unwind},
    time::Duration,
};

use tracing::{debug, error};

use crate::{
    conduit::Conduit,
    error::{domain::ConduitError, operational::ErrorReporter},
    watch::events::ChangeEvent,
};

/// Outcome of dispatching one event.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Conduits invoked, in invocation order.
    pub invoked: Vec<String>,
    /// Conduits whose flow failed or panicked.
    pub failed: Vec<String>,
}

/// The conduits of one watch, sorted once by descending priority.
///
/// Each watch owns its own pipeline; nothing is shared between watches.
#[derive(Debug, Default)]
pub struct ConduitPipeline {
    conduits: Vec<Box<dyn Conduit>>,
    event_interval: Duration,
}

impl ConduitPipeline {
    /// Creates a pipeline.
    ///
    /// # Arguments
    ///
    /// * `conduits` - Conduits in declaration order.
    /// * `event_interval` - Pause after each fully dispatched event.
    pub fn new(mut conduits: Vec<Box<dyn Conduit>>, event_interval: Duration) -> Self {
        // Stable: equal priorities keep declaration order.
        conduits.sort_by_key(|conduit| Reverse(conduit.base().priority));
        Self {
            conduits,
            event_interval,
        }
    }

    /// Number of conduits.
    pub fn len(&self) -> usize {
        self.conduits.len()
    }

    /// Whether the pipeline has no conduits.
    pub fn is_empty(&self) -> bool {
        self.conduits.is_empty()
    }

    /// Conduit names in dispatch order.
    pub fn names(&self) -> Vec<&str> {
        self.conduits.iter().map(|conduit| conduit.name()).collect()
    }

    /// Pause applied by the watch worker after each event.
    pub fn event_interval(&self) -> Duration {
        self.event_interval
    }

    /// Invokes every subscribed conduit for `event`, highest priority first.
    ///
    /// A conduit that returns an error or panics is logged and skipped; the
    /// remaining conduits still run.
    pub fn dispatch(&self, event: &ChangeEvent) -> DispatchReport {
        let mut report = DispatchReport::default();

        for conduit in &self.conduits {
            if !conduit.base().accepts(event.event_type) {
                continue;
            }

            let name = conduit.name();
            debug!(
                "{}.flow(): event={} path={:?}",
                name, event.event_type, event.source_path
            );
            report.invoked.push(name.to_string());

            let outcome = catch_unwind(AssertUnwindSafe(|| conduit.flow(event))).unwrap_or_else(
                |payload| {
                    Err(ConduitError::Panicked {
                        reason: panic_message(payload.as_ref()),
                    })
                },
            );
            if let Err(e) = outcome {
                error!(
                    conduit = name,
                    event = %event.event_type,
                    path = ?event.source_path,
                    error = %ErrorReporter::chain(&e),
                    "Conduit failed"
                );
                report.failed.push(name.to_string());
            }
        }

        report
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}
