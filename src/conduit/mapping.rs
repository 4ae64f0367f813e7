//! Local-to-remote path rewriting.

use serde::Deserialize;

use crate::error::domain::ConfigError;

/// How mappings are written in a watch file: one multi-line string or a
/// list of lines, each `from:to`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MappingSpec {
    Text(String),
    Lines(Vec<String>),
}

/// Ordered literal substring replacements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathMappings {
    pairs: Vec<(String, String)>,
}

impl PathMappings {
    /// Creates mappings from explicit pairs, kept in the given order.
    pub fn new<I, F, T>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (F, T)>,
        F: Into<String>,
        T: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(from, to)| (from.into(), to.into()))
                .collect(),
        }
    }

    /// Parses `from:to` lines.
    ///
    /// Each line is split at its first colon and both halves are trimmed.
    /// Blank lines are skipped. A repeated `from` replaces the earlier
    /// target but keeps the earlier position.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidMapping` for a line without a colon or
    /// with an empty `from`.
    pub fn parse<'a>(lines: impl IntoIterator<Item = &'a str>) -> Result<Self, ConfigError> {
        let mut mappings = Self::default();
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let (from, to) = line.split_once(':').ok_or_else(|| ConfigError::InvalidMapping {
                line: line.to_string(),
            })?;
            let (from, to) = (from.trim(), to.trim());
            if from.is_empty() {
                return Err(ConfigError::InvalidMapping {
                    line: line.to_string(),
                });
            }
            match mappings.pairs.iter_mut().find(|(existing, _)| existing == from) {
                Some(pair) => pair.1 = to.to_string(),
                None => mappings.pairs.push((from.to_string(), to.to_string())),
            }
        }
        Ok(mappings)
    }

    /// Parses the watch-file representation.
    ///
    /// # Errors
    ///
    /// See [`PathMappings::parse`].
    pub fn from_spec(spec: &MappingSpec) -> Result<Self, ConfigError> {
        match spec {
            MappingSpec::Text(text) => Self::parse(text.lines()),
            MappingSpec::Lines(lines) => Self::parse(lines.iter().map(String::as_str)),
        }
    }

    /// Whether there are no mappings.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// The `(from, to)` pairs in application order.
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Rewrites `path`; see [`map_path`].
    pub fn apply(&self, path: &str) -> String {
        map_path(path, self)
    }
}

/// Applies every mapping, in order, to the progressively rewritten path.
///
/// Each `from` is replaced everywhere it occurs. Later mappings see the
/// output of earlier ones, so a target containing another mapping's source
/// is rewritten again.
pub fn map_path(path: &str, mappings: &PathMappings) -> String {
    mappings
        .pairs
        .iter()
        .fold(path.to_string(), |rewritten, (from, to)| rewritten.replace(from.as_str(), to))
}
