//! Media-server library scan conduit.
//!
//! Finds the library section whose location contains the changed path and
//! asks the server to rescan just that path.

use std::path::Path;

use {
    reqwest::{blocking::Client, header::ACCEPT},
    serde::Deserialize,
    serde_json::Value,
    tracing::{debug, info, warn},
};

use crate::{
    conduit::{
        Conduit, ConduitBase,
        http::{ApiResponse, build_client, send},
    },
    error::domain::ConduitError,
    watch::events::{ChangeEvent, EventType},
};

/// Settings of the `plex` conduit.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlexSettings {
    pub plex_url: String,
    pub plex_token: String,
    /// Ask for a forced (full metadata) refresh.
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Library scan conduit.
#[derive(Debug)]
pub struct PlexConduit {
    base: ConduitBase,
    client: Client,
    plex_url: String,
    plex_token: String,
    force: bool,
}

impl PlexConduit {
    /// Creates the conduit.
    ///
    /// # Errors
    ///
    /// Returns `ConduitError::Http` if the HTTP client cannot be built.
    pub fn new(base: ConduitBase, settings: &PlexSettings) -> Result<Self, ConduitError> {
        Ok(Self {
            base,
            client: build_client(settings.timeout_secs)?,
            plex_url: settings.plex_url.trim_end_matches('/').to_string(),
            plex_token: settings.plex_token.clone(),
            force: settings.force,
        })
    }

    fn get(&self, endpoint: &str, query: &[(&str, String)]) -> Result<ApiResponse, ConduitError> {
        let url = format!("{}{}", self.plex_url, endpoint);
        debug!("GET {} {:?}", url, query);
        send(
            self.client
                .get(url)
                .query(query)
                .query(&[("X-Plex-Token", self.plex_token.as_str())])
                .header(ACCEPT, "application/json"),
        )
    }

    /// Lists the library sections.
    ///
    /// # Errors
    ///
    /// Returns `ConduitError::Http` on transport failure and
    /// `ConduitError::Status` for a non-success answer.
    pub fn sections(&self) -> Result<ApiResponse, ConduitError> {
        self.get("/library/sections", &[])
    }

    /// Asks the server to rescan `path` inside section `key`.
    ///
    /// # Errors
    ///
    /// Returns `ConduitError::Http` on transport failure and
    /// `ConduitError::Status` for a non-success answer.
    pub fn refresh_section(&self, key: &str, path: &str) -> Result<ApiResponse, ConduitError> {
        let mut query = vec![("path", path.to_string())];
        if self.force {
            query.push(("force", "1".to_string()));
        }
        self.get(&format!("/library/sections/{key}/refresh"), &query)
    }

    /// Scans the section containing `local_path`.
    ///
    /// A path under no section is logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns `ConduitError` if either API call fails or the section
    /// listing has an unexpected shape.
    pub fn scan(&self, local_path: &str) -> Result<(), ConduitError> {
        let mapped = self.base.map_path(local_path);
        let ApiResponse::Json(sections) = self.sections()? else {
            return Err(ConduitError::unexpected("section listing is not JSON"));
        };

        let Some(key) = find_section(&sections, &mapped) else {
            warn!("No library section contains {:?}", mapped);
            return Ok(());
        };
        info!("Scanning section {} for {:?}", key, mapped);
        self.refresh_section(&key, &mapped)?;
        Ok(())
    }
}

/// Finds the key of the first section with a location that contains
/// `path` or is contained by it.
pub fn find_section(sections: &Value, path: &str) -> Option<String> {
    let target = Path::new(path);
    sections
        .pointer("/MediaContainer/Directory")?
        .as_array()?
        .iter()
        .find(|section| {
            section
                .get("Location")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|location| location.get("path").and_then(Value::as_str))
                .any(|location| {
                    let location = Path::new(location);
                    target.starts_with(location) || location.starts_with(target)
                })
        })
        .and_then(|section| match section.get("key")? {
            Value::String(key) => Some(key.clone()),
            Value::Number(key) => Some(key.to_string()),
            _ => None,
        })
}

impl Conduit for PlexConduit {
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

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{
        conduit::{
            Conduit, ConduitBase, PathMappings,
            http::stub::StubServer,
            plex::{PlexConduit, PlexSettings, find_section},
        },
        watch::events::{ChangeEvent, EventType},
    };

    fn library() -> serde_json::Value {
        json!({
            "MediaContainer": {
                "Directory": [
                    {"key": "1", "Location": [{"path": "/media/movies"}]},
                    {"key": 2, "Location": [{"path": "/media/tv"}, {"path": "/archive/tv"}]}
                ]
            }
        })
    }

    #[test]
    fn test_find_section_by_containment() {
        let sections = library();
        assert_eq!(find_section(&sections, "/media/movies/A/a.mkv"), Some("1".to_string()));
        assert_eq!(find_section(&sections, "/archive/tv/Show"), Some("2".to_string()));
        // A parent of a section location also matches.
        assert_eq!(find_section(&sections, "/media/tv"), Some("2".to_string()));
        assert_eq!(find_section(&sections, "/media/music/x.flac"), None);
        // Component-wise: /media/tvshows is not under /media/tv.
        assert_eq!(find_section(&sections, "/media/tvshows/x"), None);
    }

    #[test]
    fn test_find_section_tolerates_odd_shapes() {
        assert_eq!(find_section(&json!({}), "/media"), None);
        assert_eq!(
            find_section(&json!({"MediaContainer": {"Directory": [{"key": "3"}]}}), "/media"),
            None
        );
    }

    #[test]
    fn test_flow_refreshes_mapped_path_in_matching_section() {
        let server = StubServer::start(vec![library().to_string(), "{}".to_string()]);
        let conduit = PlexConduit::new(
            ConduitBase::new("plex", [], 0, PathMappings::new([("/data", "/media")])),
            &PlexSettings {
                plex_url: server.url.clone(),
                plex_token: "secret".to_string(),
                force: true,
                timeout_secs: Some(5),
            },
        )
        .unwrap();

        let event = ChangeEvent::new(EventType::Created, false, "/data/movies/A/a.mkv");
        conduit.flow(&event).unwrap();

        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].starts_with("GET /library/sections?X-Plex-Token=secret "));
        assert!(requests[0].to_ascii_lowercase().contains("accept: application/json"));
        assert!(requests[1].starts_with(
            "GET /library/sections/1/refresh?path=%2Fmedia%2Fmovies%2FA%2Fa.mkv&force=1&X-Plex-Token=secret "
        ));
    }

    #[test]
    fn test_flow_skips_paths_outside_every_section() {
        let server = StubServer::start(vec![library().to_string()]);
        let conduit = PlexConduit::new(
            ConduitBase::new("plex", [], 0, PathMappings::default()),
            &PlexSettings {
                plex_url: server.url.clone(),
                plex_token: "secret".to_string(),
                force: false,
                timeout_secs: Some(5),
            },
        )
        .unwrap();

        let event = ChangeEvent::new(EventType::Deleted, false, "/elsewhere/x");
        conduit.flow(&event).unwrap();
        assert_eq!(server.requests().len(), 1);
    }
}
