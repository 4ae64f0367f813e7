//! Operational error context propagation with `anyhow`.
//!
//! This module provides extension traits and utilities for adding context
//! to errors and for reporting failures that are logged rather than handled.

use std::{error::Error as StdError, fmt::Display};

use {
    anyhow::{Context, Error, Result as AnyhowResult},
    tracing::error,
};

/// Extension trait for enhanced error context.
pub trait ResultExt<T, E> {
    /// Adds context to an error with a static string.
    fn add_context(self, context: &'static str) -> AnyhowResult<T>
    where
        E: StdError + Send + Sync + 'static;

    /// Adds context to an error with a formatted string.
    fn add_contextf(self, format: impl Display) -> AnyhowResult<T>
    where
        E: StdError + Send + Sync + 'static;
}

impl<T, E> ResultExt<T, E> for Result<T, E> {
    fn add_context(self, context: &'static str) -> AnyhowResult<T>
    where
        E: StdError + Send + Sync + 'static,
    {
        self.context(context)
    }

    fn add_contextf(self, format: impl Display) -> AnyhowResult<T>
    where
        E: StdError + Send + Sync + 'static,
    {
        self.context(format.to_string())
    }
}

/// Centralized reporting for errors that are logged and then swallowed.
///
/// Watch files, conduit entries and conduit invocations all fail in
/// isolation; the `ErrorReporter` makes sure each such failure is logged
/// with its complete source chain before processing moves on.
pub struct ErrorReporter;

impl ErrorReporter {
    /// Reports a failure that stopped one unit of work.
    pub fn error(error: &Error, context: &str) {
        error!(context = context, error = %Self::chain(error.as_ref()), "Operation failed");
    }

    /// Renders an error and every `source()` below it as one line.
    pub fn chain(error: &(dyn StdError + 'static)) -> String {
        let mut rendered = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            rendered.push_str(": ");
            rendered.push_str(&cause.to_string());
            source = cause.source();
        }
        rendered
    }
}

#[cfg(test)]
mod tests {
    use std::{
        error::Error,
        fmt::{Display, Formatter, Result as FmtResult},
        io::{Error as IoError, ErrorKind::PermissionDenied},
        path::PathBuf,
    };

    use crate::error::{
        domain::ConfigError,
        operational::{ErrorReporter, ResultExt},
    };

    #[derive(Debug)]
    struct TestError;

    impl Display for TestError {
        fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
            write!(f, "Test error")
        }
    }

    impl Error for TestError {}

    #[test]
    fn test_result_ext_with_context() {
        let result: Result<i32, TestError> = Err(TestError);
        let error = result.add_context("Loading watch file").unwrap_err();
        assert!(error.to_string().contains("Loading watch file"));
    }

    #[test]
    fn test_result_ext_with_contextf() {
        let result: Result<i32, TestError> = Err(TestError);
        let error = result.add_contextf(format!("Watch file {}", "a.yaml")).unwrap_err();
        assert!(error.to_string().contains("Watch file a.yaml"));
    }

    #[test]
    fn test_chain_includes_sources() {
        let error = ConfigError::Io {
            path: PathBuf::from("/etc/watch.yaml"),
            source: IoError::new(PermissionDenied, "denied"),
        };
        let rendered = ErrorReporter::chain(&error);
        assert!(rendered.starts_with("Cannot read"));
        assert!(rendered.ends_with(": denied"));
    }
}
