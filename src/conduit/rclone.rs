//! Remote metadata-cache refresh conduit.
//!
//! The remote service keeps its own cache of a mounted filesystem and only
//! refreshes a directory whose parent it already knows. After a local
//! change the conduit probes upward from the mapped path until the remote
//! side recognises an ancestor, then refreshes the unknown directories back
//! down, root to leaf, so each refresh sees its parent materialised.

use std::{fmt::Debug, time::Instant};

use {
    reqwest::blocking::Client,
    serde::Deserialize,
    serde_json::{Value, json},
    tracing::{debug, error, info, warn},
};

use crate::{
    conduit::{
        Conduit, ConduitBase,
        http::{ApiResponse, build_client, send},
    },
    error::domain::ConduitError,
    watch::events::{ChangeEvent, EventType},
};

/// Status string the remote service reports for an unknown path.
const NOT_FOUND: &str = "file does not exist";

/// Per-path result of a refresh request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshStatus {
    /// The path exists remotely and was refreshed.
    Ok,
    /// The remote cache does not know the path.
    NotFound,
    /// Any other diagnostic reported by the service.
    Other(String),
}

impl RefreshStatus {
    fn from_result(response: &ApiResponse, path: &str) -> Self {
        match response
            .get("result")
            .and_then(|result| result.get(path))
            .and_then(Value::as_str)
        {
            Some("OK") => RefreshStatus::Ok,
            Some(NOT_FOUND) => RefreshStatus::NotFound,
            Some(other) => RefreshStatus::Other(other.to_string()),
            None => RefreshStatus::Other(response.describe()),
        }
    }
}

/// Operations the reconciliation algorithm needs from the remote service.
pub trait CacheRemote: Debug + Send {
    /// Directories and files currently held in the remote metadata cache.
    ///
    /// Used only for reporting; implementations return zeros when the
    /// counters are unavailable.
    fn metadata_cache(&self) -> (u64, u64);

    /// Refreshes one remote directory, non-recursively.
    ///
    /// # Errors
    ///
    /// Returns `ConduitError` when the request itself fails.
    fn refresh(&self, remote_path: &str) -> Result<RefreshStatus, ConduitError>;
}

/// Outcome of reconciling one path.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Closest ancestor the remote side knew; `None` if the top was reached.
    pub anchor: Option<String>,
    /// Paths the remote side did not know, root to leaf.
    pub unresolved: Vec<String>,
    /// Unresolved paths refreshed successfully on the way down.
    pub refreshed: Vec<String>,
    /// Path whose downward refresh failed, ending the downward phase.
    pub failed: Option<String>,
}

/// Parent of a `/`-separated remote path.
///
/// Returns `None` at the top of the hierarchy, where the parent would be
/// the path itself: `/` for absolute paths and the empty string for
/// relative ones.
pub fn remote_parent(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    let parent = match trimmed.rfind('/') {
        Some(index) => trimmed[..index].trim_end_matches('/'),
        None => return Some(String::new()),
    };
    if parent.is_empty() && path.starts_with('/') {
        Some("/".to_string())
    } else {
        Some(parent.to_string())
    }
}

/// Refreshes one path and logs the cache counter deltas around it.
fn timed_refresh(remote: &dyn CacheRemote, path: &str) -> Result<RefreshStatus, ConduitError> {
    let (start_dirs, start_files) = remote.metadata_cache();
    let started = Instant::now();
    let status = remote.refresh(path)?;
    let elapsed = started.elapsed();
    let (dirs, files) = remote.metadata_cache();
    info!(
        "dirs={} files={} elapsed={:.1}s path={:?} result={:?}",
        dirs as i64 - start_dirs as i64,
        files as i64 - start_files as i64,
        elapsed.as_secs_f64(),
        path,
        status
    );
    Ok(status)
}

/// Brings the remote cache up to date for one mapped path.
///
/// File changes start the search at the parent directory, directory
/// changes at the path itself. The upward search ends at the first path
/// the remote side knows; reaching the top of the hierarchy instead is
/// logged as a warning and ends the whole procedure. Unknown paths are then
/// refreshed root to leaf, stopping at the first one that does not report
/// success.
///
/// # Errors
///
/// Returns `ConduitError` if a refresh request fails outright.
pub fn reconcile(
    remote: &dyn CacheRemote,
    remote_path: &str,
    is_directory: bool,
) -> Result<Reconciliation, ConduitError> {
    let mut candidate = if is_directory {
        remote_path.to_string()
    } else {
        remote_parent(remote_path).unwrap_or_else(|| remote_path.to_string())
    };

    let mut unresolved = Vec::new();
    let mut status = timed_refresh(remote, &candidate)?;
    while status == RefreshStatus::NotFound {
        unresolved.push(candidate.clone());
        match remote_parent(&candidate) {
            Some(parent) => {
                candidate = parent;
                status = timed_refresh(remote, &candidate)?;
            }
            None => {
                warn!("Hit the top-level path: {:?} (from {:?})", candidate, remote_path);
                unresolved.reverse();
                return Ok(Reconciliation {
                    unresolved,
                    ..Reconciliation::default()
                });
            }
        }
    }
    if let RefreshStatus::Other(diagnostic) = &status {
        warn!("Refreshing {:?} reported: {}", candidate, diagnostic);
    }

    unresolved.reverse();
    let mut reconciliation = Reconciliation {
        anchor: Some(candidate),
        ..Reconciliation::default()
    };
    for path in &unresolved {
        let status = timed_refresh(remote, path)?;
        if status != RefreshStatus::Ok {
            error!("Could not refresh: {:?} result={:?}", path, status);
            reconciliation.failed = Some(path.clone());
            break;
        }
        reconciliation.refreshed.push(path.clone());
    }
    reconciliation.unresolved = unresolved;

    debug!("{:?}", reconciliation);
    Ok(reconciliation)
}

/// Settings of the `rclone` conduit.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RcloneSettings {
    /// Base URL of the remote-control API.
    pub rc_url: String,
    #[serde(default)]
    pub rc_user: String,
    #[serde(default)]
    pub rc_pass: String,
    /// Name of the VFS whose cache is refreshed.
    #[serde(default)]
    pub vfs: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// JSON-over-HTTP client for the remote-control API.
#[derive(Debug)]
pub struct RcloneClient {
    client: Client,
    rc_url: String,
    rc_user: String,
    rc_pass: String,
    vfs: Option<String>,
}

impl RcloneClient {
    /// Creates a client from conduit settings.
    ///
    /// # Errors
    ///
    /// Returns `ConduitError::Http` if the HTTP client cannot be built.
    pub fn new(settings: &RcloneSettings) -> Result<Self, ConduitError> {
        Ok(Self {
            client: build_client(settings.timeout_secs)?,
            rc_url: settings.rc_url.trim().trim_end_matches('/').to_string(),
            rc_user: settings.rc_user.trim().to_string(),
            rc_pass: settings.rc_pass.trim().to_string(),
            vfs: settings.vfs.as_deref().map(str::trim).map(ToString::to_string),
        })
    }

    fn command(&self, command: &str, payload: Value) -> Result<ApiResponse, ConduitError> {
        debug!("{}: {}", command, payload);
        let request = self
            .client
            .post(format!("{}/{}", self.rc_url, command))
            .basic_auth(&self.rc_user, Some(&self.rc_pass))
            .json(&payload);
        send(request)
    }

    fn payload(&self, mut fields: Value) -> Value {
        if let (Some(vfs), Some(object)) = (&self.vfs, fields.as_object_mut()) {
            object.insert("fs".to_string(), Value::String(vfs.clone()));
        }
        fields
    }

    /// `vfs/stats`: cache statistics of the configured VFS.
    ///
    /// # Errors
    ///
    /// Returns `ConduitError` if the call fails.
    pub fn vfs_stats(&self) -> Result<ApiResponse, ConduitError> {
        self.command("vfs/stats", self.payload(json!({})))
    }

    /// `vfs/refresh`: re-reads one directory into the cache.
    ///
    /// # Errors
    ///
    /// Returns `ConduitError` if the call fails.
    pub fn vfs_refresh(&self, dir: &str, recursive: bool) -> Result<ApiResponse, ConduitError> {
        self.command(
            "vfs/refresh",
            self.payload(json!({ "dir": dir, "recursive": recursive.to_string() })),
        )
    }

    /// `operations/stat`: metadata of one remote item.
    ///
    /// # Errors
    ///
    /// Returns `ConduitError` if the call fails.
    pub fn operations_stat(&self, remote: &str, opt: Option<Value>) -> Result<ApiResponse, ConduitError> {
        let mut fields = json!({ "remote": remote });
        if let (Some(opt), Some(object)) = (opt, fields.as_object_mut()) {
            object.insert("opt".to_string(), opt);
        }
        self.command("operations/stat", self.payload(fields))
    }

    /// Whether `remote` is a directory; unknown items are not.
    ///
    /// # Errors
    ///
    /// Returns `ConduitError` if the call fails.
    pub fn is_dir(&self, remote: &str) -> Result<bool, ConduitError> {
        let response = self.operations_stat(remote, None)?;
        let is_dir = response.get("item").and_then(|item| item.get("IsDir"));
        Ok(match is_dir {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(flag)) => flag.eq_ignore_ascii_case("true"),
            _ => false,
        })
    }
}

impl CacheRemote for RcloneClient {
    fn metadata_cache(&self) -> (u64, u64) {
        let stats = match self.vfs_stats() {
            Ok(response) => response.get("metadataCache").cloned(),
            Err(e) => {
                error!("Could not read cache statistics: {}", e);
                None
            }
        };
        match stats {
            Some(cache) => (
                cache.get("dirs").and_then(Value::as_u64).unwrap_or(0),
                cache.get("files").and_then(Value::as_u64).unwrap_or(0),
            ),
            None => {
                error!("No metadata cache statistics, assumed 0...");
                (0, 0)
            }
        }
    }

    fn refresh(&self, remote_path: &str) -> Result<RefreshStatus, ConduitError> {
        let response = self.vfs_refresh(remote_path, false)?;
        Ok(RefreshStatus::from_result(&response, remote_path))
    }
}

/// Cache-refresh conduit.
#[derive(Debug)]
pub struct RcloneConduit {
    base: ConduitBase,
    remote: Box<dyn CacheRemote>,
}

impl RcloneConduit {
    /// Creates a conduit talking to the configured remote-control API.
    ///
    /// # Errors
    ///
    /// Returns `ConduitError::Http` if the HTTP client cannot be built.
    pub fn new(base: ConduitBase, settings: &RcloneSettings) -> Result<Self, ConduitError> {
        Ok(Self::with_remote(base, Box::new(RcloneClient::new(settings)?)))
    }

    /// Creates a conduit over any [`CacheRemote`].
    pub fn with_remote(base: ConduitBase, remote: Box<dyn CacheRemote>) -> Self {
        Self { base, remote }
    }

    /// Maps a local path and reconciles it remotely.
    ///
    /// # Errors
    ///
    /// Returns `ConduitError` if a refresh request fails.
    pub fn refresh(&self, local_path: &str, is_directory: bool) -> Result<Reconciliation, ConduitError> {
        let remote_path = self.base.map_path(local_path);
        reconcile(self.remote.as_ref(), &remote_path, is_directory)
    }
}

impl Conduit for RcloneConduit {
    fn base(&self) -> &ConduitBase {
        &self.base
    }

    fn flow(&self, event: &ChangeEvent) -> Result<(), ConduitError> {
        let source = self.refresh(&event.source_str(), event.is_directory);
        if event.event_type == EventType::Moved && event.destination_path.is_some() {
            let destination = self.refresh(&event.destination_str(), event.is_directory);
            source.and(destination)?;
        } else {
            source?;
        }
        Ok(())
    }
}
