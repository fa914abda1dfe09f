mod sqlite;

pub use sqlite::SqliteStore;

pub use chatvault_snapshot::ChatRecord;

/// Abstract storage interface for the local conversation mirror.
///
/// All methods use `&self` — implementations must handle interior mutability
/// (e.g. `Mutex<Connection>` for sqlite).
pub trait Store: Send + Sync + 'static {
    /// Persist or update one peer's conversation snapshot.
    fn upsert_conversation(&self, record: &ChatRecord) -> Result<(), String>;

    /// Get a conversation by peer id.
    fn get_conversation(&self, peer_id: i64) -> Result<Option<ChatRecord>, String>;

    /// List all conversations, newest message first.
    fn all_conversations(&self) -> Result<Vec<ChatRecord>, String>;

    /// Delete every conversation (the destructive half of a restore).
    fn clear_conversations(&self) -> Result<(), String>;

    /// Set the user remark on a conversation. Returns false when the peer
    /// is unknown.
    fn set_remark(&self, peer_id: i64, remark: &str) -> Result<bool, String>;

    /// Recompute latest flags after a full list fetch: peers in `present`
    /// become latest, everyone else stops being latest. Rows are never
    /// deleted here.
    fn apply_latest_flags(&self, present: &[i64]) -> Result<(), String>;

    /// Read a metadata value (bookkeeping such as the last backup time).
    fn get_meta(&self, key: &str) -> Result<Option<String>, String>;

    /// Write a metadata value.
    fn set_meta(&self, key: &str, value: &str) -> Result<(), String>;
}

/// Metadata key recording the last successful backup, per site and user,
/// as epoch milliseconds.
pub fn last_backup_key(site_id: &str, user_id: i64) -> String {
    format!("last_backup_{site_id}_{user_id}")
}
