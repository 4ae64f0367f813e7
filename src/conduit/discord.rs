//! Webhook notification conduit.

use {
    chrono::Local,
    reqwest::{blocking::Client, header::ACCEPT},
    serde::Deserialize,
    serde_json::{Value, json},
    tracing::debug,
};

use crate::{
    conduit::{
        Conduit, ConduitBase,
        http::{build_client, send},
    },
    error::domain::ConduitError,
    watch::events::{ChangeEvent, EventType},
};

const DEFAULT_API_URL: &str = "https://discord.com/api";
const DEFAULT_USERNAME: &str = "Watchdog";

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_username() -> String {
    DEFAULT_USERNAME.to_string()
}

/// Settings of the `discord` conduit.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscordSettings {
    pub webhook_id: String,
    pub webhook_token: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Posts one rich embed per file event.
#[derive(Debug)]
pub struct DiscordConduit {
    base: ConduitBase,
    client: Client,
    endpoint: String,
    username: String,
}

impl DiscordConduit {
    /// Creates the conduit.
    ///
    /// # Errors
    ///
    /// Returns `ConduitError::Http` if the HTTP client cannot be built.
    pub fn new(base: ConduitBase, settings: &DiscordSettings) -> Result<Self, ConduitError> {
        Ok(Self {
            base,
            client: build_client(settings.timeout_secs)?,
            endpoint: format!(
                "{}/webhooks/{}/{}",
                settings.api_url.trim_end_matches('/'),
                settings.webhook_id.trim(),
                settings.webhook_token.trim()
            ),
            username: settings.username.clone(),
        })
    }

    /// Sends `embeds` through the webhook.
    pub fn webhook(&self, embeds: Vec<Value>) -> Result<(), ConduitError> {
        let payload = json!({"username": self.username, "embeds": embeds});
        let response = send(
            self.client
                .post(&self.endpoint)
                .header(ACCEPT, "application/json, */*")
                .json(&payload),
        )?;
        debug!("{}", response.describe());
        Ok(())
    }
}

/// Builds the embed describing one event.
pub fn embed(event_type: EventType, path: &str, timestamp: &str) -> Value {
    json!({
        "type": "rich",
        "title": event_type.as_str(),
        "description": format!("{path}\n\n{timestamp}"),
    })
}

impl Conduit for DiscordConduit {
    fn base(&self) -> &ConduitBase {
        &self.base
    }

    fn flow(&self, event: &ChangeEvent) -> Result<(), ConduitError> {
        if event.is_directory {
            return Ok(());
        }
        let local = if event.event_type == EventType::Moved && event.destination_path.is_some() {
            event.destination_str()
        } else {
            event.source_str()
        };
        let now = Local::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string();
        self.webhook(vec![embed(event.event_type, &self.base.map_path(&local), &now)])
    }
}
