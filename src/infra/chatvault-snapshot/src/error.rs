use thiserror::Error;

/// Snapshot serialization errors.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to encode backup snapshot: {0}")]
    Encode(serde_json::Error),

    #[error("backup snapshot did not parse: {0}")]
    Decode(serde_json::Error),
}
