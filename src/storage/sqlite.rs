//! SQLite Message Store
//!
//! One `messages` table keyed by the message id, with an index on the
//! acceptance timestamp (stored as microseconds since the epoch) so the
//! backlog query is a short reverse index scan.
//!
//! rusqlite is synchronous, so every call runs on tokio's blocking pool
//! behind a `std::sync::Mutex`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::{Message, MessageStore, StoreError, StoreResult};

/// SQLite-backed message store
pub struct SqliteMessageStore {
    conn: Arc<Mutex<Connection>>,
}

/// Raw column values before decoding
type MessageRow = (String, String, String, String, i64);

impl SqliteMessageStore {
    /// Open or create a store at `path`
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Self::init_schema(&conn)?;
        tracing::info!(path = ?path, "Opened SQLite message store");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> StoreResult<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                content TEXT NOT NULL,
                sender TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp)",
            [],
        )?;

        Ok(())
    }

    fn decode(row: MessageRow) -> StoreResult<Message> {
        let (id, kind, content, sender, micros) = row;

        let id = Uuid::parse_str(&id)
            .map_err(|e| StoreError::Corruption(format!("invalid id {:?}: {}", id, e)))?;
        let timestamp = DateTime::<Utc>::from_timestamp_micros(micros)
            .ok_or_else(|| StoreError::Corruption(format!("timestamp out of range: {}", micros)))?;

        Ok(Message {
            id,
            kind,
            content,
            sender,
            timestamp,
        })
    }
}

fn lock_poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("connection lock poisoned".to_string())
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn save(&self, message: &Message) -> StoreResult<()> {
        let conn = Arc::clone(&self.conn);
        let message = message.clone();

        tokio::task::spawn_blocking(move || -> StoreResult<()> {
            let conn = conn.lock().map_err(lock_poisoned)?;
            conn.prepare_cached(
                "INSERT INTO messages (id, type, content, sender, timestamp)
                 VALUES (?, ?, ?, ?, ?)",
            )?
            .execute(params![
                message.id.to_string(),
                message.kind,
                message.content,
                message.sender,
                message.timestamp.timestamp_micros(),
            ])?;
            Ok(())
        })
        .await?
    }

    async fn recent_messages(&self, limit: usize) -> StoreResult<Vec<Message>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let conn = Arc::clone(&self.conn);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = tokio::task::spawn_blocking(move || -> StoreResult<Vec<MessageRow>> {
            let conn = conn.lock().map_err(lock_poisoned)?;
            let mut stmt = conn.prepare_cached(
                "SELECT id, type, content, sender, timestamp FROM messages
                 ORDER BY timestamp DESC, rowid DESC
                 LIMIT ?",
            )?;

            let rows = stmt
                .query_map(params![limit], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                })?
                .collect::<Result<Vec<MessageRow>, _>>()?;

            Ok(rows)
        })
        .await??;

        // Newest-first from the index scan; replay wants oldest-first
        rows.into_iter().rev().map(Self::decode).collect()
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    /// SQLite keeps a ":memory:" database private to its connection
    fn scratch_store() -> SqliteMessageStore {
        SqliteMessageStore::open(":memory:").unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_preserves_fields() {
        let store = scratch_store();
        let msg = Message::new("chat", "hello there", "alice");

        store.save(&msg).await.unwrap();
        let fetched = store.recent_messages(10).await.unwrap();

        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, msg.id);
        assert_eq!(fetched[0].kind, "chat");
        assert_eq!(fetched[0].content, "hello there");
        assert_eq!(fetched[0].sender, "alice");
        assert_eq!(
            fetched[0].timestamp.timestamp_micros(),
            msg.timestamp.timestamp_micros()
        );
    }

    #[tokio::test]
    async fn test_recent_is_oldest_first_and_limited() {
        let store = scratch_store();

        // Saved out of timestamp order on purpose
        for (secs, content) in [(3, "third"), (1, "first"), (4, "fourth"), (2, "second")] {
            store
                .save(&Message::with_timestamp("chat", content, "bob", at(secs)))
                .await
                .unwrap();
        }

        let recent = store.recent_messages(3).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["second", "third", "fourth"]);
    }

    #[tokio::test]
    async fn test_zero_limit_returns_nothing() {
        let store = scratch_store();
        store.save(&Message::new("chat", "x", "y")).await.unwrap();

        assert!(store.recent_messages(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_messages_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("murmur.db");

        {
            let store = SqliteMessageStore::open(&path).unwrap();
            store
                .save(&Message::new("system", "persisted", "server"))
                .await
                .unwrap();
        }

        let store = SqliteMessageStore::open(&path).unwrap();

        let recent = store.recent_messages(50).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content, "persisted");
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let store = scratch_store();
        let msg = Message::new("chat", "once", "alice");

        store.save(&msg).await.unwrap();
        let err = store.save(&msg).await.unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));
    }
}
