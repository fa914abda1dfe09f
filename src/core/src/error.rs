use chatvault_snapshot::SnapshotError;
use reqwest::StatusCode;
use thiserror::Error;

/// Errors surfaced by backup, restore and sync operations.
#[derive(Debug, Error)]
pub enum BackupError {
    /// Not logged in upstream, or a destination rejected our credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// No backup destination is enabled and configured.
    #[error("no backup destination configured")]
    NotConfigured,

    /// Remote write contention after exhausting retries.
    #[error("remote conflict: {0}")]
    Conflict(String),

    /// The requested remote object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The body did not parse as a backup snapshot.
    #[error(transparent)]
    Format(#[from] SnapshotError),

    /// Transport failure talking to a destination or the site API.
    #[error("network error: {0}")]
    Network(String),

    /// The fixed request deadline elapsed.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Local store failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Every attempted destination failed; the message lists each reason.
    #[error("all destinations failed: {0}")]
    AllFailed(String),
}

impl BackupError {
    /// Classify a transport error from the HTTP client.
    pub(crate) fn transport(context: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(format!("{context}: {err}"))
        } else {
            Self::Network(format!("{context}: {err}"))
        }
    }

    /// Classify a non-success HTTP status from a remote.
    pub(crate) fn from_status(context: &str, status: StatusCode) -> Self {
        match status.as_u16() {
            401 | 403 => Self::Auth(format!("{context}: HTTP {status}")),
            404 => Self::NotFound(format!("{context}: HTTP {status}")),
            409 => Self::Conflict(format!("{context}: HTTP {status}")),
            _ => Self::Network(format!("{context}: HTTP {status}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            BackupError::from_status("upload", StatusCode::UNAUTHORIZED),
            BackupError::Auth(_)
        ));
        assert!(matches!(
            BackupError::from_status("upload", StatusCode::FORBIDDEN),
            BackupError::Auth(_)
        ));
        assert!(matches!(
            BackupError::from_status("download", StatusCode::NOT_FOUND),
            BackupError::NotFound(_)
        ));
        assert!(matches!(
            BackupError::from_status("upload", StatusCode::CONFLICT),
            BackupError::Conflict(_)
        ));
        assert!(matches!(
            BackupError::from_status("list", StatusCode::INTERNAL_SERVER_ERROR),
            BackupError::Network(_)
        ));
    }
}
