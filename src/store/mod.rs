//! Persistence for users, chat sessions, messages and feedback.
//!
//! [`Store`] is implemented by an in-process [`memory::MemoryStore`] and by
//! [`postgres::PgStore`]; the server picks one at startup.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub role: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
    pub role: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatSession {
    pub id: i64,
    pub user_id: i64,
    pub session_title: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub session_metadata: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: i64,
    pub session_title: Option<String>,
    pub session_metadata: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionChanges {
    #[serde(default)]
    pub session_title: Option<String>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Message {
    pub id: i64,
    pub session_id: i64,
    pub sender: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub message_type: String,
    pub sources: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub session_id: i64,
    pub sender: String,
    pub content: String,
    pub message_type: String,
    pub sources: Option<Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Feedback {
    pub id: i64,
    pub message_id: i64,
    pub user_id: Option<i64>,
    pub rating: i32,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFeedback {
    pub message_id: i64,
    pub user_id: Option<i64>,
    pub rating: i32,
    pub comment: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => StoreError::NotFound("row"),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_owned())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    fn name(&self) -> &str;

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;
    async fn user_by_id(&self, id: i64) -> Result<Option<User>, StoreError>;
    async fn user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn update_user(&self, id: i64, changes: UserChanges) -> Result<User, StoreError>;
    /// Every user, ordered by id.
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;
    /// Removes the user with their sessions and messages. Feedback they left
    /// on other messages stays, detached from them. `false` when absent.
    async fn delete_user(&self, id: i64) -> Result<bool, StoreError>;

    async fn create_session(&self, session: NewSession) -> Result<ChatSession, StoreError>;
    async fn session_by_id(&self, id: i64) -> Result<Option<ChatSession>, StoreError>;
    async fn session_ids_for_user(&self, user_id: i64) -> Result<Vec<i64>, StoreError>;
    async fn update_session(
        &self,
        id: i64,
        changes: SessionChanges,
    ) -> Result<Option<ChatSession>, StoreError>;

    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError>;
    async fn message_by_id(&self, id: i64) -> Result<Option<Message>, StoreError>;
    /// Messages of one session, oldest first.
    async fn messages_for_session(&self, session_id: i64) -> Result<Vec<Message>, StoreError>;

    async fn create_feedback(&self, feedback: NewFeedback) -> Result<Feedback, StoreError>;
    async fn feedback_for_message(&self, message_id: i64)
        -> Result<Option<Feedback>, StoreError>;
}
