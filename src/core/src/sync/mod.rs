mod runner;

pub use runner::SyncRunner;

use chatvault_snapshot::ChatRecord;
use serde::Serialize;

use crate::sites::{ListEntry, ThreadMessage};

/// Result of one list-driven sync pass.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// Conversations the upstream list reported.
    pub checked: usize,
    /// Peers whose stored record changed this pass.
    pub updated_peers: Vec<i64>,
    /// Whether the pass ended in a successful backup.
    pub backed_up: bool,
}

/// Result of syncing a single conversation thread.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadSyncReport {
    pub peer_id: i64,
    pub changed: bool,
    pub backed_up: bool,
}

/// Which side of a list entry is the peer, from the current user's view.
pub(crate) fn peer_side(entry: &ListEntry, user_id: i64) -> (i64, &str) {
    if entry.sender_id == user_id {
        (entry.receiver_id, entry.receiver_name.as_str())
    } else {
        (entry.sender_id, entry.sender_name.as_str())
    }
}

/// A list entry is news iff nothing is stored for the peer or the stored
/// last-message timestamp differs. Content edits without a timestamp change
/// do not count; the upstream never produces them.
pub(crate) fn entry_is_news(entry: &ListEntry, existing: Option<&ChatRecord>) -> bool {
    match existing {
        Some(record) => record.last_message_timestamp != entry.created_at,
        None => true,
    }
}

/// Fold one list entry into a store record. Peers present in a list fetch
/// are the latest set by definition; the remark carries over from any
/// existing row.
pub(crate) fn record_from_list_entry(
    entry: &ListEntry,
    user_id: i64,
    existing: Option<&ChatRecord>,
    now: &str,
) -> ChatRecord {
    let (peer_id, peer_name) = peer_side(entry, user_id);
    ChatRecord {
        peer_id,
        peer_name: peer_name.to_string(),
        last_message_content: entry.content.clone(),
        last_message_timestamp: entry.created_at.clone(),
        sender_id: entry.sender_id,
        receiver_id: entry.receiver_id,
        last_message_id: entry.max_id,
        viewed: entry.viewed,
        updated_at: now.to_string(),
        is_latest: true,
        remark: existing.map(|r| r.remark.clone()).unwrap_or_default(),
    }
}

/// Fold a thread's newest message into a store record. A thread fetch sees
/// one conversation only, so the latest flag and remark carry over
/// untouched.
pub(crate) fn record_from_thread(
    peer_id: i64,
    peer_name: &str,
    newest: &ThreadMessage,
    existing: Option<&ChatRecord>,
    now: &str,
) -> ChatRecord {
    let peer_name = if !peer_name.is_empty() {
        peer_name.to_string()
    } else {
        existing
            .map(|r| r.peer_name.clone())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "unknown".to_string())
    };
    ChatRecord {
        peer_id,
        peer_name,
        last_message_content: newest.content.clone(),
        last_message_timestamp: newest.created_at.clone(),
        sender_id: newest.sender_id,
        receiver_id: newest.receiver_id,
        last_message_id: newest.id,
        viewed: newest.viewed,
        updated_at: now.to_string(),
        is_latest: existing.map(|r| r.is_latest).unwrap_or(false),
        remark: existing.map(|r| r.remark.clone()).unwrap_or_default(),
    }
}
