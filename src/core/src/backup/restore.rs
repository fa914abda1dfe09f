use std::sync::Mutex;

use chatvault_snapshot::BackupSnapshot;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::dest::Destination;
use crate::error::BackupError;
use crate::storage::Store;
use crate::vault_config::VaultConfig;

/// What a restore did, record by record.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    /// Records carried by the snapshot.
    pub total: usize,
    /// Records written into the local store.
    pub restored: usize,
    /// Records dropped for lacking a usable peer id.
    pub skipped: usize,
    /// Records that failed to write.
    pub failed: usize,
    /// Whether snapshot-borne settings were merged into the config.
    pub config_applied: bool,
}

/// Replace the local mirror with the contents of one remote snapshot.
///
/// The snapshot is downloaded and decoded before anything is touched; a
/// body that does not parse leaves the store exactly as it was. After the
/// wipe each record is written individually so one bad row cannot abort
/// the rest.
pub(crate) async fn run_restore(
    store: &dyn Store,
    config: &Mutex<VaultConfig>,
    dest: &dyn Destination,
    id: &str,
) -> Result<RestoreOutcome, BackupError> {
    let bytes = dest.download(id).await?;
    let snapshot = BackupSnapshot::decode(&bytes)?;

    store.clear_conversations().map_err(BackupError::Storage)?;

    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let total = snapshot.chats.len();
    let mut restored = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;
    for mut record in snapshot.chats {
        if record.peer_id <= 0 {
            tracing::warn!(peer_id = record.peer_id, "snapshot record has no peer id, skipping");
            skipped += 1;
            continue;
        }
        if record.peer_name.is_empty() {
            record.peer_name = "unknown".to_string();
        }
        if record.last_message_timestamp.is_empty() {
            record.last_message_timestamp = now.clone();
        }
        if record.updated_at.is_empty() {
            record.updated_at = now.clone();
        }
        match store.upsert_conversation(&record) {
            Ok(()) => restored += 1,
            Err(err) => {
                tracing::warn!(peer_id = record.peer_id, error = %err, "failed to restore record");
                failed += 1;
            }
        }
    }

    let mut config_applied = false;
    if let Some(settings) = snapshot.config.as_ref() {
        match config.lock() {
            Ok(mut config) => {
                config.apply_snapshot_config(settings);
                config_applied = true;
            }
            Err(_) => tracing::warn!("config lock poisoned, snapshot settings not applied"),
        }
    }

    tracing::info!(total, restored, skipped, failed, "restore finished");
    Ok(RestoreOutcome {
        total,
        restored,
        skipped,
        failed,
        config_applied,
    })
}
