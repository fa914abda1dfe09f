use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::backup::BackupService;
use crate::error::BackupError;
use crate::sites::SiteApi;
use crate::storage::Store;
use crate::sync::{
    entry_is_news, peer_side, record_from_list_entry, record_from_thread, SyncReport,
    ThreadSyncReport,
};
use crate::vault_config::SyncConfig;

/// Floor for the poll period; upstream rate limits make anything tighter
/// counterproductive.
const MIN_SYNC_INTERVAL_SECS: u64 = 30;

/// Periodic message sync: polls the upstream conversation list, folds
/// changes into the store and triggers a backup whenever something moved.
/// Shared between the background loop and the manual HTTP triggers.
pub struct SyncRunner {
    store: Arc<dyn Store>,
    api: Arc<dyn SiteApi>,
    backups: Arc<BackupService>,
    user_id: i64,
    interval_secs: u64,
    backup_on_start: bool,
    enabled: bool,
}

impl SyncRunner {
    pub fn new(
        store: Arc<dyn Store>,
        api: Arc<dyn SiteApi>,
        backups: Arc<BackupService>,
        user_id: i64,
        settings: SyncConfig,
    ) -> Self {
        Self {
            store,
            api,
            backups,
            user_id,
            interval_secs: settings.interval_secs,
            backup_on_start: settings.backup_on_start,
            enabled: settings.enabled,
        }
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run_startup().await;
            if !self.enabled {
                tracing::info!("message polling disabled, not starting the poll loop");
                return;
            }
            let period = Duration::from_secs(self.interval_secs.max(MIN_SYNC_INTERVAL_SECS));
            let mut tick = tokio::time::interval(period);
            tick.tick().await;
            loop {
                tick.tick().await;
                if let Err(err) = self.sync_once().await {
                    warn!(error = %err, "message sync tick failed");
                }
            }
        })
    }

    /// First pass after start: populate the mirror, then take the startup
    /// backup unless the sync already produced one.
    async fn run_startup(self: &Arc<Self>) {
        let backed_up = match self.sync_once().await {
            Ok(report) => report.backed_up,
            Err(err) => {
                warn!(error = %err, "initial message sync failed");
                false
            }
        };
        if self.backup_on_start && !backed_up {
            if let Err(err) = self.backups.perform_backup().await {
                warn!(error = %err, "startup backup failed");
            }
        }
    }

    /// Fetch the conversation list and fold it into the store. Triggers at
    /// most one backup per pass, and only when something changed; a failed
    /// backup is reported in the result, not as an error, since the local
    /// mirror did advance.
    pub async fn sync_once(self: &Arc<Self>) -> Result<SyncReport, BackupError> {
        let list = self.api.conversation_list().await?;
        if !list.success {
            return Err(BackupError::Network(
                "conversation list request was rejected".into(),
            ));
        }

        let now = now_iso();
        let mut present = Vec::new();
        let mut updated = Vec::new();
        for entry in &list.messages {
            let (peer_id, _) = peer_side(entry, self.user_id);
            if peer_id <= 0 {
                continue;
            }
            present.push(peer_id);
            let existing = self
                .store
                .get_conversation(peer_id)
                .map_err(BackupError::Storage)?;
            if !entry_is_news(entry, existing.as_ref()) {
                continue;
            }
            let record = record_from_list_entry(entry, self.user_id, existing.as_ref(), &now);
            self.store
                .upsert_conversation(&record)
                .map_err(BackupError::Storage)?;
            updated.push(peer_id);
        }
        self.store
            .apply_latest_flags(&present)
            .map_err(BackupError::Storage)?;

        let mut backed_up = false;
        if !updated.is_empty() {
            tracing::info!(updated = updated.len(), "conversations changed, backing up");
            match self.backups.perform_backup().await {
                Ok(_) => backed_up = true,
                Err(err) => warn!(error = %err, "backup after sync failed"),
            }
        }

        Ok(SyncReport {
            checked: list.messages.len(),
            updated_peers: updated,
            backed_up,
        })
    }

    /// Sync one conversation from its thread view. Cheaper than a full list
    /// pass and usable for peers the list no longer carries.
    pub async fn sync_thread(self: &Arc<Self>, peer_id: i64) -> Result<ThreadSyncReport, BackupError> {
        let thread = self.api.conversation_with(peer_id).await?;
        if !thread.success {
            return Err(BackupError::NotFound(format!(
                "conversation {peer_id} is not available"
            )));
        }
        let Some(newest) = thread.messages.last() else {
            return Ok(ThreadSyncReport {
                peer_id,
                changed: false,
                backed_up: false,
            });
        };

        let resolved_peer = if thread.peer.member_id > 0 {
            thread.peer.member_id
        } else {
            peer_id
        };
        let existing = self
            .store
            .get_conversation(resolved_peer)
            .map_err(BackupError::Storage)?;
        if let Some(existing) = existing.as_ref() {
            if existing.last_message_timestamp == newest.created_at {
                return Ok(ThreadSyncReport {
                    peer_id: resolved_peer,
                    changed: false,
                    backed_up: false,
                });
            }
        }

        let now = now_iso();
        let record = record_from_thread(
            resolved_peer,
            &thread.peer.member_name,
            newest,
            existing.as_ref(),
            &now,
        );
        self.store
            .upsert_conversation(&record)
            .map_err(BackupError::Storage)?;

        let backed_up = match self.backups.perform_backup().await {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "backup after thread sync failed");
                false
            }
        };
        Ok(ThreadSyncReport {
            peer_id: resolved_peer,
            changed: true,
            backed_up,
        })
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
