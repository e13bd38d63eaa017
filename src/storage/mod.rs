//! Conversation persistence. The controller is the only writer; everything
//! else observes through it.

use std::fmt;

use async_trait::async_trait;

use crate::core::conversation::Conversation;

pub mod sqlite;

#[derive(Debug)]
pub enum StorageError {
    Database(rusqlite::Error),
    Serialization(serde_json::Error),
    Io(std::io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Database(err) => write!(f, "database error: {err}"),
            StorageError::Serialization(err) => write!(f, "serialization error: {err}"),
            StorageError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Database(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err)
    }
}

/// CRUD over persisted conversations.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn get_all(&self) -> Result<Vec<Conversation>, StorageError>;
    async fn get_by_id(&self, id: &str) -> Result<Option<Conversation>, StorageError>;
    async fn insert(&self, conversation: &Conversation) -> Result<(), StorageError>;
    async fn update(&self, conversation: &Conversation) -> Result<(), StorageError>;
    async fn delete(&self, id: &str) -> Result<(), StorageError>;
}
