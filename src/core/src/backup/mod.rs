mod restore;
mod retention;

pub use restore::RestoreOutcome;

use std::sync::{Arc, Mutex};

use chatvault_snapshot::{BackupSnapshot, SnapshotMetadata, FORMAT_VERSION};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::dest::{Destination, DestinationKind};
use crate::error::BackupError;
use crate::storage::{last_backup_key, Store};
use crate::vault_config::VaultConfig;

/// One successful upload within a backup run.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub destination: DestinationKind,
    /// Object name the destination stored the snapshot under.
    pub object: String,
}

/// Result of one backup run. `partial` is true when at least one
/// destination failed while another succeeded; `message` then carries the
/// per-destination failure summary.
#[derive(Debug, Clone, Serialize)]
pub struct BackupOutcome {
    pub total_chats: usize,
    pub uploaded: Vec<UploadReport>,
    pub partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A remote snapshot tagged with the destination holding it.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteBackup {
    pub destination: DestinationKind,
    pub id: String,
    pub last_modified: DateTime<Utc>,
}

/// Orchestrates snapshot assembly, the fan-out to destinations, retention
/// and restore. One instance lives for the daemon's lifetime; the sync
/// runner and the HTTP handlers share it.
pub struct BackupService {
    store: Arc<dyn Store>,
    destinations: Vec<Arc<dyn Destination>>,
    config: Mutex<VaultConfig>,
    site_id: String,
    user_id: i64,
}

impl BackupService {
    pub fn new(
        store: Arc<dyn Store>,
        destinations: Vec<Arc<dyn Destination>>,
        config: VaultConfig,
        site_id: &str,
        user_id: i64,
    ) -> Self {
        Self {
            store,
            destinations,
            config: Mutex::new(config),
            site_id: site_id.to_string(),
            user_id,
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn config(&self) -> &Mutex<VaultConfig> {
        &self.config
    }

    pub fn destinations(&self) -> &[Arc<dyn Destination>] {
        &self.destinations
    }

    fn destination(&self, kind: DestinationKind) -> Option<Arc<dyn Destination>> {
        self.destinations.iter().find(|d| d.kind() == kind).cloned()
    }

    fn active_destinations(&self) -> Vec<Arc<dyn Destination>> {
        self.destinations.iter().filter(|d| d.configured()).cloned().collect()
    }

    /// Epoch milliseconds of the last successful backup for this identity,
    /// if one ever happened.
    pub fn last_backup_at(&self) -> Result<Option<i64>, String> {
        let key = last_backup_key(&self.site_id, self.user_id);
        Ok(self
            .store
            .get_meta(&key)?
            .and_then(|raw| raw.parse::<i64>().ok()))
    }

    fn retention_policy(&self) -> Result<crate::vault_config::RetentionConfig, BackupError> {
        Ok(self
            .config
            .lock()
            .map_err(|_| BackupError::Storage("config lock poisoned".to_string()))?
            .retention
            .clone())
    }

    /// Serialize the current store contents into a snapshot body.
    fn build_snapshot(&self) -> Result<(usize, Vec<u8>), BackupError> {
        let chats = self.store.all_conversations().map_err(BackupError::Storage)?;
        let settings = self
            .config
            .lock()
            .map_err(|_| BackupError::Storage("config lock poisoned".to_string()))?
            .snapshot_config();
        let snapshot = BackupSnapshot {
            metadata: SnapshotMetadata {
                user_id: self.user_id,
                backup_time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                total_chats: chats.len(),
                version: FORMAT_VERSION.to_string(),
            },
            config: Some(settings),
            chats,
        };
        let total = snapshot.metadata.total_chats;
        let bytes = snapshot.encode()?;
        Ok((total, bytes))
    }

    /// Snapshot the store once and upload to every configured destination
    /// concurrently. Succeeds if at least one destination took the upload;
    /// retention runs afterwards, detached, on the destinations that did.
    pub async fn perform_backup(&self) -> Result<BackupOutcome, BackupError> {
        let active = self.active_destinations();
        if active.is_empty() {
            return Err(BackupError::NotConfigured);
        }

        let (total_chats, bytes) = self.build_snapshot()?;
        tracing::info!(total_chats, destinations = active.len(), "starting backup");

        let uploads = active.iter().map(|dest| {
            let bytes = &bytes;
            async move { (dest.kind(), dest.upload(bytes).await) }
        });
        let results = futures::future::join_all(uploads).await;

        let mut uploaded = Vec::new();
        let mut failures = Vec::new();
        for (kind, result) in results {
            match result {
                Ok(object) => {
                    tracing::info!(destination = %kind, object = %object, "backup uploaded");
                    uploaded.push(UploadReport {
                        destination: kind,
                        object,
                    });
                }
                Err(err) => {
                    tracing::warn!(destination = %kind, error = %err, "backup upload failed");
                    failures.push((kind, err));
                }
            }
        }

        if uploaded.is_empty() {
            if failures.len() == 1 {
                return Err(failures.remove(0).1);
            }
            return Err(BackupError::AllFailed(summarize_failures(&failures)));
        }

        let stamp = Utc::now().timestamp_millis().to_string();
        let key = last_backup_key(&self.site_id, self.user_id);
        if let Err(err) = self.store.set_meta(&key, &stamp) {
            tracing::warn!(error = %err, "failed to record backup time");
        }

        let policy = self.retention_policy()?;
        for report in &uploaded {
            if let Some(dest) = self.destination(report.destination) {
                let policy = policy.clone();
                tokio::spawn(async move {
                    if let Err(err) = retention::prune(dest.as_ref(), &policy).await {
                        tracing::warn!(destination = %dest.kind(), error = %err, "pruning old backups failed");
                    }
                });
            }
        }

        let message = if failures.is_empty() {
            None
        } else {
            Some(summarize_failures(&failures))
        };

        Ok(BackupOutcome {
            total_chats,
            uploaded,
            partial: !failures.is_empty(),
            message,
        })
    }

    /// List remote snapshots, newest first. With a kind given, only that
    /// destination is queried; otherwise listings are merged across all of
    /// them.
    pub async fn list_backups(
        &self,
        kind: Option<DestinationKind>,
    ) -> Result<Vec<RemoteBackup>, BackupError> {
        let targets = match kind {
            Some(kind) => vec![self.destination(kind).ok_or(BackupError::NotConfigured)?],
            None => self.destinations.clone(),
        };
        let mut merged = Vec::new();
        for dest in targets {
            let entries = dest.list().await?;
            merged.extend(entries.into_iter().map(|entry| RemoteBackup {
                destination: dest.kind(),
                id: entry.id,
                last_modified: entry.last_modified,
            }));
        }
        merged.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(merged)
    }

    /// Restore the local store from one remote snapshot, then persist any
    /// settings the snapshot carried. A failed config write is logged, not
    /// fatal; the data restore already happened.
    pub async fn restore(
        &self,
        kind: DestinationKind,
        id: &str,
    ) -> Result<RestoreOutcome, BackupError> {
        let dest = self.destination(kind).ok_or(BackupError::NotConfigured)?;
        let outcome = restore::run_restore(self.store.as_ref(), &self.config, dest.as_ref(), id).await?;
        if outcome.config_applied {
            let result = match self.config.lock() {
                Ok(config) => config.save(),
                Err(_) => Err("config lock poisoned".to_string()),
            };
            if let Err(err) = result {
                tracing::warn!(error = %err, "failed to persist restored settings");
            }
        }
        Ok(outcome)
    }
}

/// "webdav: ...; r2: ..." listing each destination's failure reason.
fn summarize_failures(failures: &[(DestinationKind, BackupError)]) -> String {
    failures
        .iter()
        .map(|(kind, err)| format!("{kind}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}
