//! Glob-based event filtering applied before pipeline dispatch.

use {
    globset::{GlobBuilder, GlobSet, GlobSetBuilder},
    tracing::debug,
};

use crate::{error::domain::ConfigError, watch::events::ChangeEvent};

/// Decides which events of a watch reach its pipeline.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
    ignore_directories: bool,
}

impl EventFilter {
    /// Builds a filter from glob patterns.
    ///
    /// # Arguments
    ///
    /// * `patterns` - Include globs; empty means every path.
    /// * `ignore_patterns` - Exclude globs.
    /// * `ignore_directories` - Drop every directory event.
    /// * `case_sensitive` - Match globs case-sensitively.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for a malformed glob.
    pub fn new(
        patterns: &[String],
        ignore_patterns: &[String],
        ignore_directories: bool,
        case_sensitive: bool,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            include: build_set(patterns, case_sensitive)?,
            exclude: build_set(ignore_patterns, case_sensitive)?,
            ignore_directories,
        })
    }

    /// Whether `event` should be dispatched.
    ///
    /// An event passes when at least one of its paths is included and not
    /// excluded.
    pub fn allows(&self, event: &ChangeEvent) -> bool {
        if self.ignore_directories && event.is_directory {
            return false;
        }

        let allowed = event.paths().any(|path| {
            let included = self.include.as_ref().is_none_or(|set| set.is_match(path));
            let excluded = self.exclude.as_ref().is_some_and(|set| set.is_match(path));
            included && !excluded
        });
        if !allowed {
            debug!("Filtered out {} {:?}", event.event_type, event.source_path);
        }
        allowed
    }
}

fn build_set(patterns: &[String], case_sensitive: bool) -> Result<Option<GlobSet>, ConfigError> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(!case_sensitive)
            .build()
            .map_err(|e| ConfigError::invalid_value(format!("glob {pattern:?}: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map(Some)
        .map_err(|e| ConfigError::invalid_value(format!("glob set: {e}")))
}
