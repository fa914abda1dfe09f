use serde::{Deserialize, Serialize};

use crate::SnapshotError;

/// Current snapshot format version. Bumped when the wire shape gains fields;
/// decoding stays tolerant of older versions via field defaults.
pub const FORMAT_VERSION: &str = "2";

/// One peer's conversation state as carried inside a backup snapshot.
///
/// Every field defaults so that snapshots written before a field existed
/// still decode; the restore path substitutes meaningful values afterwards.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatRecord {
    pub peer_id: i64,
    pub peer_name: String,
    pub last_message_content: String,
    /// ISO-8601, as reported upstream. Staleness comparisons key on this.
    pub last_message_timestamp: String,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub last_message_id: i64,
    pub viewed: bool,
    /// ISO-8601, set at every local write.
    pub updated_at: String,
    /// True iff the peer appeared in the most recent full list fetch.
    pub is_latest: bool,
    /// User-supplied annotation, empty if unset.
    pub remark: String,
}

/// Snapshot header.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotMetadata {
    pub user_id: i64,
    pub backup_time: String,
    pub total_chats: usize,
    pub version: String,
}

/// Non-secret configuration embedded in a snapshot so that restoring on a
/// fresh install can reconstitute backup settings. Credentials are never
/// included; only endpoints, usernames and paths travel.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotConfig {
    pub backup: BackupSettings,
    pub retention: RetentionSettings,
    pub webdav: Option<WebdavSettings>,
    pub r2: Option<R2Settings>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupSettings {
    pub auto: bool,
    pub interval_secs: u64,
}

/// Which retention rule is active. Both limits are carried regardless so a
/// user can switch kinds without re-entering the other value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionKind {
    Count,
    Age,
}

impl Default for RetentionKind {
    fn default() -> Self {
        Self::Count
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetentionSettings {
    pub kind: RetentionKind,
    pub count_limit: u32,
    pub age_days: u32,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            kind: RetentionKind::Count,
            count_limit: 30,
            age_days: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebdavSettings {
    pub enabled: bool,
    pub url: String,
    pub username: String,
    pub backup_path: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct R2Settings {
    pub enabled: bool,
    pub endpoint: String,
    pub base_path: String,
}

/// The full exported bundle written to a destination.
///
/// `chats` is deliberately not defaulted: a body without it is not a backup
/// snapshot, and decoding must fail before anything destructive happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    #[serde(default)]
    pub metadata: SnapshotMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<SnapshotConfig>,
    pub chats: Vec<ChatRecord>,
}

impl BackupSnapshot {
    pub fn encode(&self) -> Result<Vec<u8>, SnapshotError> {
        serde_json::to_vec(self).map_err(SnapshotError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SnapshotError> {
        serde_json::from_slice(bytes).map_err(SnapshotError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(peer_id: i64, name: &str) -> ChatRecord {
        ChatRecord {
            peer_id,
            peer_name: name.into(),
            last_message_content: "hello".into(),
            last_message_timestamp: "2026-08-20T10:00:00.000Z".into(),
            sender_id: peer_id,
            receiver_id: 7,
            last_message_id: 42,
            viewed: true,
            updated_at: "2026-08-20T10:00:01.000Z".into(),
            is_latest: true,
            remark: String::new(),
        }
    }

    #[test]
    fn round_trip_preserves_records() {
        let snapshot = BackupSnapshot {
            metadata: SnapshotMetadata {
                user_id: 7,
                backup_time: "2026-08-20T10:00:02.000Z".into(),
                total_chats: 2,
                version: FORMAT_VERSION.into(),
            },
            config: Some(SnapshotConfig::default()),
            chats: vec![record(101, "alice"), record(102, "bob")],
        };

        let bytes = snapshot.encode().unwrap();
        let decoded = BackupSnapshot::decode(&bytes).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn wire_keys_are_camel_case() {
        let snapshot = BackupSnapshot {
            metadata: SnapshotMetadata::default(),
            config: None,
            chats: vec![record(101, "alice")],
        };
        let text = String::from_utf8(snapshot.encode().unwrap()).unwrap();
        assert!(text.contains("\"peerId\":101"));
        assert!(text.contains("\"lastMessageTimestamp\""));
        assert!(text.contains("\"backupTime\""));
        assert!(!text.contains("\"config\""));
    }

    #[test]
    fn decode_tolerates_older_formats() {
        // A first-generation snapshot: no version, no config, and chat
        // records predating isLatest/remark.
        let body = r#"{
            "metadata": { "userId": 7, "backupTime": "2025-01-01T00:00:00.000Z", "totalChats": 1 },
            "chats": [ { "peerId": 101, "peerName": "alice", "lastMessageContent": "hi" } ]
        }"#;

        let decoded = BackupSnapshot::decode(body.as_bytes()).unwrap();
        assert_eq!(decoded.metadata.user_id, 7);
        assert_eq!(decoded.metadata.version, "");
        assert!(decoded.config.is_none());
        assert_eq!(decoded.chats.len(), 1);
        assert_eq!(decoded.chats[0].peer_id, 101);
        assert!(!decoded.chats[0].is_latest);
        assert_eq!(decoded.chats[0].remark, "");
    }

    #[test]
    fn decode_rejects_missing_chats() {
        let body = r#"{ "metadata": { "userId": 7 } }"#;
        assert!(matches!(
            BackupSnapshot::decode(body.as_bytes()),
            Err(SnapshotError::Decode(_))
        ));
    }

    #[test]
    fn decode_rejects_non_array_chats() {
        let body = r#"{ "chats": { "101": {} } }"#;
        assert!(matches!(
            BackupSnapshot::decode(body.as_bytes()),
            Err(SnapshotError::Decode(_))
        ));
    }

    #[test]
    fn retention_kind_wire_values() {
        assert_eq!(serde_json::to_string(&RetentionKind::Count).unwrap(), "\"count\"");
        assert_eq!(serde_json::to_string(&RetentionKind::Age).unwrap(), "\"age\"");
        let parsed: RetentionKind = serde_json::from_str("\"age\"").unwrap();
        assert_eq!(parsed, RetentionKind::Age);
    }
}
