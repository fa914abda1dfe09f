use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};

use super::{ChatRecord, Store};

/// SQLite-backed conversation mirror.
///
/// Uses a `Mutex<Connection>` for thread-safe interior mutability.
/// The database is created/migrated on `open()`.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a sqlite database at the given path.
    pub fn open(path: &Path) -> Result<Self, String> {
        let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_memory() -> Result<Self, String> {
        let conn = Connection::open_in_memory().map_err(|e| format!("sqlite open: {e}"))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS conversations (
                peer_id          INTEGER PRIMARY KEY,
                peer_name        TEXT NOT NULL,
                last_message     TEXT NOT NULL,
                last_message_at  TEXT NOT NULL,
                sender_id        INTEGER NOT NULL,
                receiver_id      INTEGER NOT NULL,
                last_message_id  INTEGER NOT NULL,
                viewed           INTEGER NOT NULL DEFAULT 0,
                updated_at       TEXT NOT NULL,
                is_latest        INTEGER NOT NULL DEFAULT 0,
                remark           TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_conversations_last_message_at
                ON conversations (last_message_at DESC);

            CREATE TABLE IF NOT EXISTS meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| format!("migrate: {e}"))?;

        // Databases written before these columns existed.
        if let Err(e) = conn.execute(
            "ALTER TABLE conversations ADD COLUMN is_latest INTEGER NOT NULL DEFAULT 0",
            [],
        ) {
            let msg = e.to_string().to_lowercase();
            if !msg.contains("duplicate column") {
                return Err(format!("migrate add conversations.is_latest: {e}"));
            }
        }

        if let Err(e) = conn.execute(
            "ALTER TABLE conversations ADD COLUMN remark TEXT NOT NULL DEFAULT ''",
            [],
        ) {
            let msg = e.to_string().to_lowercase();
            if !msg.contains("duplicate column") {
                return Err(format!("migrate add conversations.remark: {e}"));
            }
        }

        Ok(())
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatRecord> {
    Ok(ChatRecord {
        peer_id: row.get(0)?,
        peer_name: row.get(1)?,
        last_message_content: row.get(2)?,
        last_message_timestamp: row.get(3)?,
        sender_id: row.get(4)?,
        receiver_id: row.get(5)?,
        last_message_id: row.get(6)?,
        viewed: row.get(7)?,
        updated_at: row.get(8)?,
        is_latest: row.get(9)?,
        remark: row.get(10)?,
    })
}

const RECORD_COLUMNS: &str = "peer_id, peer_name, last_message, last_message_at, sender_id,
     receiver_id, last_message_id, viewed, updated_at, is_latest, remark";

impl Store for SqliteStore {
    fn upsert_conversation(&self, record: &ChatRecord) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        conn.execute(
            "INSERT INTO conversations (peer_id, peer_name, last_message, last_message_at,
                 sender_id, receiver_id, last_message_id, viewed, updated_at, is_latest, remark)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(peer_id) DO UPDATE SET
                peer_name = excluded.peer_name,
                last_message = excluded.last_message,
                last_message_at = excluded.last_message_at,
                sender_id = excluded.sender_id,
                receiver_id = excluded.receiver_id,
                last_message_id = excluded.last_message_id,
                viewed = excluded.viewed,
                updated_at = excluded.updated_at,
                is_latest = excluded.is_latest,
                remark = excluded.remark",
            params![
                record.peer_id,
                record.peer_name,
                record.last_message_content,
                record.last_message_timestamp,
                record.sender_id,
                record.receiver_id,
                record.last_message_id,
                record.viewed,
                record.updated_at,
                record.is_latest,
                record.remark,
            ],
        )
        .map_err(|e| format!("upsert_conversation: {e}"))?;
        Ok(())
    }

    fn get_conversation(&self, peer_id: i64) -> Result<Option<ChatRecord>, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM conversations WHERE peer_id = ?1"
            ))
            .map_err(|e| format!("get_conversation prepare: {e}"))?;

        let mut rows = stmt
            .query_map(params![peer_id], row_to_record)
            .map_err(|e| format!("get_conversation query: {e}"))?;

        match rows.next() {
            Some(Ok(rec)) => Ok(Some(rec)),
            Some(Err(e)) => Err(format!("get_conversation row: {e}")),
            None => Ok(None),
        }
    }

    fn all_conversations(&self) -> Result<Vec<ChatRecord>, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM conversations ORDER BY last_message_at DESC"
            ))
            .map_err(|e| format!("all_conversations prepare: {e}"))?;

        let rows = stmt
            .query_map([], row_to_record)
            .map_err(|e| format!("all_conversations query: {e}"))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("all_conversations collect: {e}"))
    }

    fn clear_conversations(&self) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        conn.execute("DELETE FROM conversations", [])
            .map_err(|e| format!("clear_conversations: {e}"))?;
        Ok(())
    }

    fn set_remark(&self, peer_id: i64, remark: &str) -> Result<bool, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let changed = conn
            .execute(
                "UPDATE conversations SET remark = ?1 WHERE peer_id = ?2",
                params![remark, peer_id],
            )
            .map_err(|e| format!("set_remark: {e}"))?;
        Ok(changed > 0)
    }

    fn apply_latest_flags(&self, present: &[i64]) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        conn.execute("UPDATE conversations SET is_latest = 0", [])
            .map_err(|e| format!("apply_latest_flags reset: {e}"))?;
        for peer_id in present {
            conn.execute(
                "UPDATE conversations SET is_latest = 1 WHERE peer_id = ?1",
                params![peer_id],
            )
            .map_err(|e| format!("apply_latest_flags set: {e}"))?;
        }
        Ok(())
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let mut stmt = conn
            .prepare("SELECT value FROM meta WHERE key = ?1")
            .map_err(|e| format!("get_meta prepare: {e}"))?;

        let mut rows = stmt
            .query_map(params![key], |row| row.get::<_, String>(0))
            .map_err(|e| format!("get_meta query: {e}"))?;

        match rows.next() {
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(e)) => Err(format!("get_meta row: {e}")),
            None => Ok(None),
        }
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(|e| format!("set_meta: {e}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> SqliteStore {
        SqliteStore::open_memory().unwrap()
    }

    fn record(peer_id: i64, name: &str, ts: &str) -> ChatRecord {
        ChatRecord {
            peer_id,
            peer_name: name.into(),
            last_message_content: "hi".into(),
            last_message_timestamp: ts.into(),
            sender_id: peer_id,
            receiver_id: 7,
            last_message_id: 1,
            viewed: false,
            updated_at: ts.into(),
            is_latest: false,
            remark: String::new(),
        }
    }

    #[test]
    fn upsert_and_get_conversation() {
        let store = make_store();
        store
            .upsert_conversation(&record(101, "alice", "2026-08-20T10:00:00Z"))
            .unwrap();

        let loaded = store.get_conversation(101).unwrap().unwrap();
        assert_eq!(loaded.peer_name, "alice");
        assert_eq!(loaded.last_message_timestamp, "2026-08-20T10:00:00Z");
        assert!(store.get_conversation(999).unwrap().is_none());
    }

    #[test]
    fn upsert_overwrites_on_conflict() {
        let store = make_store();
        let rec = record(101, "alice", "2026-08-20T10:00:00Z");
        store.upsert_conversation(&rec).unwrap();

        let updated = ChatRecord {
            last_message_content: "newer".into(),
            last_message_timestamp: "2026-08-21T09:00:00Z".into(),
            viewed: true,
            is_latest: true,
            ..rec
        };
        store.upsert_conversation(&updated).unwrap();

        let all = store.all_conversations().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].last_message_content, "newer");
        assert!(all[0].viewed);
        assert!(all[0].is_latest);
    }

    #[test]
    fn all_conversations_newest_first() {
        let store = make_store();
        for (id, ts) in [
            (101, "2026-08-20T10:00:00Z"),
            (102, "2026-08-22T10:00:00Z"),
            (103, "2026-08-21T10:00:00Z"),
        ] {
            store.upsert_conversation(&record(id, "p", ts)).unwrap();
        }
        let all = store.all_conversations().unwrap();
        assert_eq!(
            all.iter().map(|r| r.peer_id).collect::<Vec<_>>(),
            vec![102, 103, 101]
        );
    }

    #[test]
    fn clear_conversations_empties_table() {
        let store = make_store();
        store
            .upsert_conversation(&record(101, "alice", "2026-08-20T10:00:00Z"))
            .unwrap();
        store.clear_conversations().unwrap();
        assert!(store.all_conversations().unwrap().is_empty());
    }

    #[test]
    fn set_remark_only_on_known_peers() {
        let store = make_store();
        store
            .upsert_conversation(&record(101, "alice", "2026-08-20T10:00:00Z"))
            .unwrap();

        assert!(store.set_remark(101, "college friend").unwrap());
        assert!(!store.set_remark(999, "nobody").unwrap());
        let loaded = store.get_conversation(101).unwrap().unwrap();
        assert_eq!(loaded.remark, "college friend");
    }

    #[test]
    fn apply_latest_flags_recomputes() {
        let store = make_store();
        for id in [101, 102, 103] {
            let mut rec = record(id, "p", "2026-08-20T10:00:00Z");
            rec.is_latest = true;
            store.upsert_conversation(&rec).unwrap();
        }

        store.apply_latest_flags(&[102]).unwrap();

        let all = store.all_conversations().unwrap();
        for rec in all {
            assert_eq!(rec.is_latest, rec.peer_id == 102, "peer {}", rec.peer_id);
        }
    }

    #[test]
    fn meta_roundtrip_and_overwrite() {
        let store = make_store();
        assert!(store.get_meta("last_backup_ns_7").unwrap().is_none());

        store.set_meta("last_backup_ns_7", "1000").unwrap();
        store.set_meta("last_backup_ns_7", "2000").unwrap();
        assert_eq!(
            store.get_meta("last_backup_ns_7").unwrap().as_deref(),
            Some("2000")
        );
    }
}
