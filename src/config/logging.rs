//! Tracing subscriber installation.
//!
//! The binary installs one subscriber: stderr always, plus a size-rotated
//! log file when requested. Every sink sees text that has already been
//! passed through the [`Redactor`], so tokens and API keys carried in URLs
//! never reach a log.

use std::{
    borrow::Cow,
    fs::OpenOptions,
    io::{IsTerminal, Result as IoResult, Write, stderr},
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    anyhow::Result,
    file_rotate::{ContentLimit, FileRotate, compression::Compression, suffix::AppendCount},
    parking_lot::Mutex,
    regex::{Captures, Regex},
    tracing::{Level, warn},
    tracing_subscriber::{EnvFilter, fmt, fmt::MakeWriter, prelude::*, registry},
};

use crate::error::operational::ResultExt;

const REDACTED: &str = "<REDACTED>";

/// Patterns always redacted; the first capture group is kept.
const BUILTIN_REDACTIONS: [&str; 2] = [r"(X-Plex-Token=)[^&\s]+", r"(apikey=)[^&\s]+"];

/// Size past which the log file is rotated.
pub const LOG_FILE_MAX_BYTES: usize = 5 * 1024 * 1024;

/// Rotated log files kept next to the live one.
pub const LOG_FILE_BACKUPS: usize = 5;

/// Logging options collected from the command line.
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Net `-v` count minus `-q` count.
    pub verbosity: i8,
    /// File to append logs to, rotated by size.
    pub log_file: Option<PathBuf>,
    /// Extra regular expressions whose matches are redacted.
    pub redact: Vec<String>,
}

impl LoggingConfig {
    /// Level used when `RUST_LOG` is not set.
    pub fn level(&self) -> Level {
        match self.verbosity {
            i8::MIN..=-1 => Level::ERROR,
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    }
}

/// Rewrites sensitive substrings before they are written.
#[derive(Debug, Clone)]
pub struct Redactor {
    patterns: Vec<Regex>,
}

impl Redactor {
    /// Builds a redactor from the built-in patterns plus `extra`.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first pattern that does not compile.
    pub fn new(extra: &[String]) -> Result<Self> {
        let patterns = BUILTIN_REDACTIONS
            .iter()
            .copied()
            .chain(extra.iter().map(String::as_str))
            .map(|pattern| Regex::new(pattern).add_contextf(format!("Invalid redaction pattern {pattern:?}")))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Replaces every match with `<REDACTED>`, keeping a first capture group.
    pub fn redact<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let mut text = Cow::Borrowed(text);
        for pattern in &self.patterns {
            let replaced = match pattern.replace_all(&text, redact_match) {
                Cow::Owned(replaced) => Some(replaced),
                Cow::Borrowed(_) => None,
            };
            if let Some(replaced) = replaced {
                text = Cow::Owned(replaced);
            }
        }
        text
    }
}

fn redact_match(captures: &Captures<'_>) -> String {
    match captures.get(1) {
        Some(prefix) => format!("{}{REDACTED}", prefix.as_str()),
        None => REDACTED.to_string(),
    }
}

/// `MakeWriter` wrapper whose writers redact what they are given.
#[derive(Debug, Clone)]
pub struct RedactingMakeWriter<M> {
    inner: M,
    redactor: Arc<Redactor>,
}

impl<M> RedactingMakeWriter<M> {
    pub fn new(inner: M, redactor: Arc<Redactor>) -> Self {
        Self { inner, redactor }
    }
}

impl<'a, M: MakeWriter<'a>> MakeWriter<'a> for RedactingMakeWriter<M> {
    type Writer = RedactingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: self.inner.make_writer(),
            redactor: self.redactor.clone(),
            buffer: Vec::new(),
        }
    }
}

/// Buffers one formatted record and writes it redacted on flush or drop.
pub struct RedactingWriter<W: Write> {
    inner: W,
    redactor: Arc<Redactor>,
    buffer: Vec<u8>,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, bytes: &[u8]) -> IoResult<usize> {
        self.buffer.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        if !self.buffer.is_empty() {
            let text = String::from_utf8_lossy(&self.buffer);
            self.inner.write_all(self.redactor.redact(&text).as_bytes())?;
            self.buffer.clear();
        }
        self.inner.flush()
    }
}

impl<W: Write> Drop for RedactingWriter<W> {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Log file shared by every writer of the file layer.
///
/// Once the file has grown past its limit, the next record goes to a fresh
/// file: the full one becomes `<name>.1`, older backups shift up by one and
/// the oldest beyond the backup count is removed.
#[derive(Clone)]
pub struct RotatingLog {
    file: Arc<Mutex<FileRotate<AppendCount>>>,
}

impl RotatingLog {
    /// Opens `path` for appending.
    pub fn new(path: &Path, max_bytes: usize, backups: usize) -> Self {
        let file = FileRotate::new(
            path,
            AppendCount::new(backups),
            ContentLimit::BytesSurpassed(max_bytes),
            Compression::None,
            #[cfg(unix)]
            None,
        );
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }
}

impl Write for RotatingLog {
    fn write(&mut self, bytes: &[u8]) -> IoResult<usize> {
        self.file.lock().write(bytes)
    }

    fn flush(&mut self) -> IoResult<()> {
        self.file.lock().flush()
    }
}

/// Opens the rotated log file when its directory exists.
///
/// Returns `Ok(None)` when the directory is missing.
fn open_log_file(path: &Path) -> Result<Option<RotatingLog>> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.is_dir()
    {
        return Ok(None);
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .add_contextf(format!("Failed to open log file {path:?}"))?;
    Ok(Some(RotatingLog::new(path, LOG_FILE_MAX_BYTES, LOG_FILE_BACKUPS)))
}

/// Installs the global subscriber.
///
/// `RUST_LOG`, when set and valid, overrides the CLI verbosity.
///
/// # Errors
///
/// Returns an error for an invalid redaction pattern, an unopenable log
/// file, or when a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level().as_str()));
    let redactor = Arc::new(Redactor::new(&config.redact)?);

    let stderr_layer = fmt::layer()
        .with_ansi(stderr().is_terminal())
        .with_writer(RedactingMakeWriter::new(stderr, redactor.clone()));

    let log_file = match &config.log_file {
        Some(path) => open_log_file(path)?,
        None => None,
    };
    let file_layer = log_file.map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_writer(RedactingMakeWriter::new(move || file.clone(), redactor))
    });
    let file_skipped = config.log_file.is_some() && file_layer.is_none();

    registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .add_context("Failed to install the tracing subscriber")?;

    if file_skipped {
        warn!(
            "Log directory of {:?} does not exist; logging to stderr only",
            config.log_file
        );
    }
    Ok(())
}
