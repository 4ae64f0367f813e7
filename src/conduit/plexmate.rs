//! Scan-request conduit for a plugin host that queues library scans.

use {
    reqwest::blocking::Client,
    serde::Deserialize,
    tracing::{debug, info},
};

use crate::{
    conduit::{
        Conduit, ConduitBase,
        http::{ApiResponse, build_client, send},
    },
    error::domain::ConduitError,
    watch::events::{ChangeEvent, EventType},
};

const PACKAGE: &str = "plex_mate";

/// Settings of the `plexmate` conduit.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlexmateSettings {
    pub ff_url: String,
    pub ff_apikey: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Queues an `ADD` scan for every changed file.
#[derive(Debug)]
pub struct PlexmateConduit {
    base: ConduitBase,
    client: Client,
    ff_url: String,
    ff_apikey: String,
}

impl PlexmateConduit {
    /// Creates the conduit.
    ///
    /// # Errors
    ///
    /// Returns `ConduitError::Http` if the HTTP client cannot be built.
    pub fn new(base: ConduitBase, settings: &PlexmateSettings) -> Result<Self, ConduitError> {
        Ok(Self {
            base,
            client: build_client(settings.timeout_secs)?,
            ff_url: settings.ff_url.trim_end_matches('/').to_string(),
            ff_apikey: settings.ff_apikey.clone(),
        })
    }

    /// Submits a scan of `target`.
    ///
    /// # Errors
    ///
    /// Returns `ConduitError::Http` on transport failure and
    /// `ConduitError::Status` for a non-success answer.
    pub fn do_scan(&self, target: &str) -> Result<ApiResponse, ConduitError> {
        let url = format!("{}/{}/api/scan/do_scan", self.ff_url, PACKAGE);
        debug!("POST {} target={:?}", url, target);
        send(self.client.post(url).form(&[
            ("target", target),
            ("mode", "ADD"),
            ("apikey", self.ff_apikey.as_str()),
        ]))
    }

    /// Maps `local_path` and submits it.
    ///
    /// # Errors
    ///
    /// Returns `ConduitError` if the scan request fails.
    pub fn scan(&self, local_path: &str) -> Result<(), ConduitError> {
        let target = self.base.map_path(local_path);
        let response = self.do_scan(&target)?;
        info!("Scan queued for {:?}: {}", target, response.describe());
        Ok(())
    }
}

impl Conduit for PlexmateConduit {
    fn base(&self) -> &ConduitBase {
        &self.base
    }

    fn flow(&self, event: &ChangeEvent) -> Result<(), ConduitError> {
        if event.is_directory {
            return Ok(());
        }
        let source = self.scan(&event.source_str());
        if event.event_type == EventType::Moved && event.destination_path.is_some() {
            source.and(self.scan(&event.destination_str()))
        } else {
            source
        }
    }
}
