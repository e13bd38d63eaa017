use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, Row};

use crate::core::conversation::Conversation;
use crate::core::message::Message;

use super::{ConversationRepository, StorageError};

/// SQLite-backed conversation store. Messages are stored as a JSON column;
/// timestamps as epoch milliseconds.
pub struct SqliteConversationStore {
    conn: Mutex<Connection>,
}

impl SqliteConversationStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open the store at the platform data directory.
    pub fn open_default() -> Result<Self, StorageError> {
        Self::open(default_db_path())
    }

    fn init_schema(conn: &Connection) -> Result<(), StorageError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                messages TEXT NOT NULL,
                create_at INTEGER NOT NULL,
                update_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn row_to_conversation(row: &Row<'_>) -> rusqlite::Result<(String, String, String, i64, i64)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
        ))
    }

    fn decode(
        (id, title, messages, create_at, update_at): (String, String, String, i64, i64),
    ) -> Result<Conversation, StorageError> {
        let messages: Vec<Message> = serde_json::from_str(&messages)?;
        Ok(Conversation {
            id,
            title,
            messages,
            created_at: millis_to_datetime(create_at),
            updated_at: millis_to_datetime(update_at),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
}

fn default_db_path() -> PathBuf {
    ProjectDirs::from("org", "permacommons", "causerie")
        .map(|dirs| dirs.data_dir().join("conversations.db"))
        .unwrap_or_else(|| PathBuf::from("conversations.db"))
}

#[async_trait]
impl ConversationRepository for SqliteConversationStore {
    async fn get_all(&self) -> Result<Vec<Conversation>, StorageError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, title, messages, create_at, update_at
             FROM conversations ORDER BY update_at DESC",
        )?;
        let rows = stmt
            .query_map([], Self::row_to_conversation)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::decode).collect()
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Conversation>, StorageError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, title, messages, create_at, update_at
             FROM conversations WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], Self::row_to_conversation)?;
        match rows.next() {
            Some(row) => Ok(Some(Self::decode(row?)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, conversation: &Conversation) -> Result<(), StorageError> {
        let messages = serde_json::to_string(&conversation.messages)?;
        let conn = self.lock();
        conn.execute(
            "INSERT INTO conversations (id, title, messages, create_at, update_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                conversation.id,
                conversation.title,
                messages,
                conversation.created_at.timestamp_millis(),
                conversation.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    async fn update(&self, conversation: &Conversation) -> Result<(), StorageError> {
        let messages = serde_json::to_string(&conversation.messages)?;
        let conn = self.lock();
        conn.execute(
            "UPDATE conversations
             SET title = ?2, messages = ?3, create_at = ?4, update_at = ?5
             WHERE id = ?1",
            params![
                conversation.id,
                conversation.title,
                messages,
                conversation.created_at.timestamp_millis(),
                conversation.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let conn = self.lock();
        conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
        Ok(())
    }
}
