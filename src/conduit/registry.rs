//! Lookup from a watch file's `class` identifier to a conduit constructor.

use std::collections::HashMap;

use {
    serde::de::DeserializeOwned,
    serde_yaml::{Mapping, Value, from_value},
};

use crate::{
    conduit::{
        Conduit, ConduitBase,
        discord::{DiscordConduit, DiscordSettings},
        dummy::{DummyConduit, DummySettings},
        plex::{PlexConduit, PlexSettings},
        plexmate::{PlexmateConduit, PlexmateSettings},
        rclone::{RcloneConduit, RcloneSettings},
        shell::{ShellCommandConduit, ShellSettings},
    },
    config::settings::ConduitEntry,
    error::domain::{ConduitError, ConfigError},
};

/// Builds a conduit from its common settings and its variant settings.
pub type ConduitFactory = fn(ConduitBase, Mapping) -> Result<Box<dyn Conduit>, ConfigError>;

/// Registered conduit variants.
#[derive(Debug, Clone, Default)]
pub struct ConduitRegistry {
    factories: HashMap<String, ConduitFactory>,
}

impl ConduitRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every built-in variant.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("rclone", build_rclone);
        registry.register("plex", build_plex);
        registry.register("plexmate", build_plexmate);
        registry.register("discord", build_discord);
        registry.register("shell", build_shell);
        registry.register("dummy", build_dummy);
        registry
    }

    /// Registers `factory` under `class`, replacing any previous one.
    pub fn register(&mut self, class: impl Into<String>, factory: ConduitFactory) {
        self.factories.insert(class.into(), factory);
    }

    /// Whether `class` is registered.
    pub fn contains(&self, class: &str) -> bool {
        self.factories.contains_key(class)
    }

    /// Registered identifiers, sorted.
    pub fn classes(&self) -> Vec<&str> {
        let mut classes: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        classes.sort_unstable();
        classes
    }

    /// Constructs the conduit an entry describes.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownVariant` for an unregistered class, or
    /// the factory's error for invalid variant settings.
    pub fn build(&self, entry: ConduitEntry) -> Result<Box<dyn Conduit>, ConfigError> {
        let factory = self
            .factories
            .get(&entry.class)
            .ok_or_else(|| ConfigError::UnknownVariant {
                class: entry.class.clone(),
            })?;
        let base = ConduitBase::new(entry.name, entry.events, entry.priority, entry.mappings);
        factory(base, entry.settings)
    }
}

fn settings<T: DeserializeOwned>(settings: Mapping) -> Result<T, ConfigError> {
    Ok(from_value(Value::Mapping(settings))?)
}

fn client_error(error: ConduitError) -> ConfigError {
    ConfigError::invalid_value(error.to_string())
}

fn build_rclone(base: ConduitBase, raw: Mapping) -> Result<Box<dyn Conduit>, ConfigError> {
    let settings: RcloneSettings = settings(raw)?;
    Ok(Box::new(RcloneConduit::new(base, &settings).map_err(client_error)?))
}

fn build_plex(base: ConduitBase, raw: Mapping) -> Result<Box<dyn Conduit>, ConfigError> {
    let settings: PlexSettings = settings(raw)?;
    Ok(Box::new(PlexConduit::new(base, &settings).map_err(client_error)?))
}

fn build_plexmate(base: ConduitBase, raw: Mapping) -> Result<Box<dyn Conduit>, ConfigError> {
    let settings: PlexmateSettings = settings(raw)?;
    Ok(Box::new(PlexmateConduit::new(base, &settings).map_err(client_error)?))
}

fn build_discord(base: ConduitBase, raw: Mapping) -> Result<Box<dyn Conduit>, ConfigError> {
    let settings: DiscordSettings = settings(raw)?;
    Ok(Box::new(DiscordConduit::new(base, &settings).map_err(client_error)?))
}

fn build_shell(base: ConduitBase, raw: Mapping) -> Result<Box<dyn Conduit>, ConfigError> {
    let settings: ShellSettings = settings(raw)?;
    Ok(Box::new(ShellCommandConduit::new(base, &settings)?))
}

fn build_dummy(base: ConduitBase, raw: Mapping) -> Result<Box<dyn Conduit>, ConfigError> {
    let _: DummySettings = settings(raw)?;
    Ok(Box::new(DummyConduit::new(base)))
}

#[cfg(test)]
mod tests {
    use serde_yaml::from_str;

    use crate::{
        conduit::ConduitRegistry, config::settings::ConduitEntry, error::domain::ConfigError,
        watch::events::EventType,
    };

    fn entry(yaml: &str) -> ConduitEntry {
        ConduitEntry::from_value(from_str(yaml).unwrap()).unwrap()
    }

    #[test]
    fn test_builtins_are_registered() {
        let registry = ConduitRegistry::with_builtins();
        assert_eq!(
            registry.classes(),
            vec!["discord", "dummy", "plex", "plexmate", "rclone", "shell"]
        );
        assert!(!registry.contains("ftp"));
    }

    #[test]
    fn test_build_applies_common_settings() {
        let registry = ConduitRegistry::with_builtins();
        let conduit = registry
            .build(entry(
                "name: cache\nclass: rclone\npriority: 7\nevents: [moved]\nmappings: '/data:/remote'\nrc_url: http://127.0.0.1:5572\nvfs: 'remote:'\n",
            ))
            .unwrap();
        assert_eq!(conduit.name(), "cache");
        assert_eq!(conduit.base().priority, 7);
        assert!(conduit.base().accepts(EventType::Moved));
        assert!(!conduit.base().accepts(EventType::Created));
        assert_eq!(conduit.base().map_path("/data/x"), "/remote/x");
    }

    #[test]
    fn test_unknown_class_is_rejected() {
        let registry = ConduitRegistry::with_builtins();
        let error = registry.build(entry("name: x\nclass: ftp\n")).unwrap_err();
        assert!(matches!(error, ConfigError::UnknownVariant { class } if class == "ftp"));
    }

    #[test]
    fn test_invalid_variant_settings_are_rejected() {
        let registry = ConduitRegistry::with_builtins();
        // Unknown field.
        assert!(registry.build(entry("name: x\nclass: dummy\nurl: y\n")).is_err());
        // Missing required field.
        assert!(registry.build(entry("name: x\nclass: plex\nplex_url: http://p\n")).is_err());
        // Unbalanced quoting.
        assert!(registry.build(entry("name: x\nclass: shell\ncommand: \"echo 'a\"\n")).is_err());
    }
}
