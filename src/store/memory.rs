use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::store::{
    ChatSession, Feedback, Message, NewFeedback, NewMessage, NewSession, NewUser, SessionChanges,
    Store, StoreError, User, UserChanges,
};

/// Process-local store; contents are lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    next_id: i64,
    users: BTreeMap<i64, User>,
    sessions: BTreeMap<i64, ChatSession>,
    messages: BTreeMap<i64, Message>,
    feedbacks: BTreeMap<i64, Feedback>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn check_unique_user(
        &self,
        id: Option<i64>,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<(), StoreError> {
        for user in self.users.values().filter(|user| Some(user.id) != id) {
            if username == Some(user.username.as_str()) {
                return Err(StoreError::Conflict("Username already registered".to_owned()));
            }
            if email.is_some() && email == user.email.as_deref() {
                return Err(StoreError::Conflict("Email already registered".to_owned()));
            }
        }
        Ok(())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut tables = self.tables.lock().await;
        tables.check_unique_user(None, Some(&user.username), user.email.as_deref())?;
        let id = tables.allocate_id();
        let user = User {
            id,
            username: user.username,
            email: user.email,
            role: user.role,
            created_at: Utc::now(),
            password_hash: user.password_hash,
        };
        tables.users.insert(id, user.clone());
        Ok(user)
    }

    async fn user_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|user| user.email.as_deref() == Some(email))
            .cloned())
    }

    async fn update_user(&self, id: i64, changes: UserChanges) -> Result<User, StoreError> {
        let mut tables = self.tables.lock().await;
        tables.check_unique_user(Some(id), changes.username.as_deref(), changes.email.as_deref())?;
        let user = tables
            .users
            .get_mut(&id)
            .ok_or(StoreError::NotFound("user"))?;

        if let Some(username) = changes.username {
            user.username = username;
        }
        if let Some(email) = changes.email {
            user.email = Some(email);
        }
        if let Some(role) = changes.role {
            user.role = role;
        }
        if let Some(password_hash) = changes.password_hash {
            user.password_hash = password_hash;
        }
        Ok(user.clone())
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.tables.lock().await.users.values().cloned().collect())
    }

    async fn delete_user(&self, id: i64) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.users.remove(&id).is_none() {
            return Ok(false);
        }

        tables.sessions.retain(|_, session| session.user_id != id);
        let Tables {
            sessions,
            messages,
            feedbacks,
            ..
        } = &mut *tables;
        messages.retain(|_, message| sessions.contains_key(&message.session_id));
        feedbacks.retain(|_, feedback| messages.contains_key(&feedback.message_id));
        for feedback in feedbacks.values_mut() {
            if feedback.user_id == Some(id) {
                feedback.user_id = None;
            }
        }
        Ok(true)
    }

    async fn create_session(&self, session: NewSession) -> Result<ChatSession, StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.users.contains_key(&session.user_id) {
            return Err(StoreError::NotFound("user"));
        }
        let id = tables.allocate_id();
        let session = ChatSession {
            id,
            user_id: session.user_id,
            session_title: session.session_title,
            started_at: Utc::now(),
            ended_at: None,
            session_metadata: session.session_metadata,
        };
        tables.sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn session_by_id(&self, id: i64) -> Result<Option<ChatSession>, StoreError> {
        Ok(self.tables.lock().await.sessions.get(&id).cloned())
    }

    async fn session_ids_for_user(&self, user_id: i64) -> Result<Vec<i64>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .sessions
            .values()
            .filter(|session| session.user_id == user_id)
            .map(|session| session.id)
            .collect())
    }

    async fn update_session(
        &self,
        id: i64,
        changes: SessionChanges,
    ) -> Result<Option<ChatSession>, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(session) = tables.sessions.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(title) = changes.session_title {
            session.session_title = Some(title);
        }
        if let Some(ended_at) = changes.ended_at {
            session.ended_at = Some(ended_at);
        }
        Ok(Some(session.clone()))
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.sessions.contains_key(&message.session_id) {
            return Err(StoreError::NotFound("chat session"));
        }
        let id = tables.allocate_id();
        let message = Message {
            id,
            session_id: message.session_id,
            sender: message.sender,
            content: message.content,
            created_at: Utc::now(),
            message_type: message.message_type,
            sources: message.sources,
        };
        tables.messages.insert(id, message.clone());
        Ok(message)
    }

    async fn message_by_id(&self, id: i64) -> Result<Option<Message>, StoreError> {
        Ok(self.tables.lock().await.messages.get(&id).cloned())
    }

    async fn messages_for_session(&self, session_id: i64) -> Result<Vec<Message>, StoreError> {
        let tables = self.tables.lock().await;
        // Ids are allocated monotonically, so key order is creation order.
        Ok(tables
            .messages
            .values()
            .filter(|message| message.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn create_feedback(&self, feedback: NewFeedback) -> Result<Feedback, StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.messages.contains_key(&feedback.message_id) {
            return Err(StoreError::NotFound("message"));
        }
        let id = tables.allocate_id();
        let feedback = Feedback {
            id,
            message_id: feedback.message_id,
            user_id: feedback.user_id,
            rating: feedback.rating,
            comment: feedback.comment,
            created_at: Utc::now(),
        };
        tables.feedbacks.insert(id, feedback.clone());
        Ok(feedback)
    }

    async fn feedback_for_message(
        &self,
        message_id: i64,
    ) -> Result<Option<Feedback>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .feedbacks
            .values()
            .find(|feedback| feedback.message_id == message_id)
            .cloned())
    }
}
