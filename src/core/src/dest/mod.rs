mod r2;
mod webdav;

pub use r2::R2Destination;
pub use webdav::WebDavDestination;

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::BackupError;

pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Conflict handling on upload: the initial attempt plus up to this many
/// retries, waiting `CONFLICT_RETRY_BASE * retry_number` between attempts.
pub(crate) const MAX_CONFLICT_RETRIES: u32 = 3;
pub(crate) const CONFLICT_RETRY_BASE: Duration = Duration::from_secs(1);

/// The destination backends a backup can fan out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    Webdav,
    R2,
}

impl DestinationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webdav => "webdav",
            Self::R2 => "r2",
        }
    }
}

impl std::fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One remote snapshot as reported by a destination listing.
#[derive(Debug, Clone, Serialize)]
pub struct BackupEntry {
    /// Identifier the destination accepts for download/delete: a DAV href
    /// for WebDAV, an object key for the R2 proxy.
    pub id: String,
    pub last_modified: DateTime<Utc>,
}

/// Remote storage capable of holding named snapshot blobs.
///
/// Implementations generate the object name at upload time (timestamped so
/// repeated uploads never collide) and report listings newest first,
/// already filtered down to this tool's objects.
pub trait Destination: Send + Sync + 'static {
    fn kind(&self) -> DestinationKind;

    /// Whether enough configuration is present to attempt an upload.
    /// Unconfigured destinations list as empty rather than erroring.
    fn configured(&self) -> bool;

    /// Write one snapshot, returning the generated object name.
    fn upload<'a>(&'a self, snapshot: &'a [u8]) -> BoxFuture<'a, Result<String, BackupError>>;

    fn list(&self) -> BoxFuture<'_, Result<Vec<BackupEntry>, BackupError>>;

    /// Raw snapshot bytes; decoding happens at the caller so transport and
    /// format failures stay distinguishable.
    fn download<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Vec<u8>, BackupError>>;

    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), BackupError>>;
}

/// Destinations report last-modified either as RFC 1123 (WebDAV) or
/// ISO-8601 (the R2 proxy). Unparseable values fall back to `None`; callers
/// substitute the current time, which keeps such entries safe from age
/// pruning.
pub(crate) fn parse_last_modified(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc2822(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    None
}

pub(crate) fn sort_newest_first(entries: &mut [BackupEntry]) {
    entries.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
}

/// Strip leading and trailing slashes.
pub(crate) fn trim_slashes(path: &str) -> &str {
    path.trim_matches('/')
}
