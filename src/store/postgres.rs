use async_trait::async_trait;
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    PgPool, Row,
};
use tracing::{info, warn};

use crate::store::{
    ChatSession, Feedback, Message, NewFeedback, NewMessage, NewSession, NewUser, SessionChanges,
    Store, StoreError, User, UserChanges,
};

const EMBEDDING_DIMENSIONS: u32 = 768;

const USER_COLUMNS: &str = "id, username, email, role, created_at, password_hash";
const SESSION_COLUMNS: &str =
    "id, user_id, session_title, started_at, ended_at, session_metadata";
const MESSAGE_COLUMNS: &str =
    "id, session_id, sender, content, created_at, message_type, sources";
const FEEDBACK_COLUMNS: &str = "id, message_id, user_id, rating, comment, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects and makes sure every table exists.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
        bootstrap(&pool).await?;
        Ok(Self { pool })
    }
}

/// Creates the schema. Safe to run on every start.
async fn bootstrap(pool: &PgPool) -> Result<(), StoreError> {
    let vector_enabled = ensure_vector_extension(pool).await;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id BIGSERIAL PRIMARY KEY,
            username VARCHAR(100) NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            email VARCHAR(255) UNIQUE,
            role VARCHAR(50) NOT NULL DEFAULT 'user',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_sessions (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            session_title VARCHAR(255),
            started_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            ended_at TIMESTAMPTZ,
            session_metadata JSONB
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id BIGSERIAL PRIMARY KEY,
            session_id BIGINT NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
            sender VARCHAR(50) NOT NULL,
            content TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            message_type VARCHAR(50) NOT NULL DEFAULT 'text',
            sources JSONB
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS feedbacks (
            id BIGSERIAL PRIMARY KEY,
            message_id BIGINT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id BIGINT REFERENCES users(id) ON DELETE SET NULL,
            rating INTEGER NOT NULL CONSTRAINT check_rating_range CHECK (rating BETWEEN 1 AND 5),
            comment TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS business_documents (
            id BIGSERIAL PRIMARY KEY,
            title VARCHAR(255) NOT NULL,
            content TEXT NOT NULL,
            status VARCHAR(20) NOT NULL DEFAULT 'active',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            tags TEXT[]
        )
        "#,
    )
    .execute(pool)
    .await?;

    let embedding_type = if vector_enabled {
        format!("vector({EMBEDDING_DIMENSIONS})")
    } else {
        "TEXT".to_owned()
    };
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS document_sections (
            id BIGSERIAL PRIMARY KEY,
            document_id BIGINT NOT NULL REFERENCES business_documents(id) ON DELETE CASCADE,
            section_title VARCHAR(255),
            content TEXT NOT NULL,
            embedding {embedding_type},
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS retrieval_logs (
            id BIGSERIAL PRIMARY KEY,
            session_id BIGINT NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
            user_question TEXT NOT NULL,
            retrieved_section_ids INTEGER[],
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, created_at)")
        .execute(pool)
        .await?;

    if vector_enabled {
        upgrade_text_embedding(pool).await;
    }

    info!(vector_enabled, "database schema ready");
    Ok(())
}

/// Returns whether the `vector` extension is available after the attempt.
async fn ensure_vector_extension(pool: &PgPool) -> bool {
    if let Err(error) = sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(pool)
        .await
    {
        warn!(error = %error, "could not create vector extension, embeddings fall back to TEXT");
    }

    match sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM pg_extension WHERE extname = 'vector')",
    )
    .fetch_one(pool)
    .await
    {
        Ok(enabled) => enabled,
        Err(error) => {
            warn!(error = %error, "could not check for vector extension");
            false
        }
    }
}

/// A table created before the extension was installed keeps a TEXT column.
async fn upgrade_text_embedding(pool: &PgPool) {
    let column_type = sqlx::query_scalar::<_, String>(
        "SELECT data_type FROM information_schema.columns \
         WHERE table_name = 'document_sections' AND column_name = 'embedding'",
    )
    .fetch_optional(pool)
    .await;

    match column_type {
        Ok(Some(data_type)) if data_type.eq_ignore_ascii_case("text") => {
            let statement = format!(
                "ALTER TABLE document_sections ALTER COLUMN embedding TYPE vector({EMBEDDING_DIMENSIONS}) USING embedding::vector"
            );
            match sqlx::query(&statement).execute(pool).await {
                Ok(_) => info!("converted document_sections.embedding to vector"),
                Err(error) => warn!(error = %error, "failed to convert embedding column"),
            }
        }
        Ok(_) => {}
        Err(error) => warn!(error = %error, "failed to inspect embedding column"),
    }
}

fn map_user(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        role: row.try_get("role")?,
        created_at: row.try_get("created_at")?,
        password_hash: row.try_get("password_hash")?,
    })
}

fn map_session(row: &PgRow) -> Result<ChatSession, sqlx::Error> {
    Ok(ChatSession {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        session_title: row.try_get("session_title")?,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        session_metadata: row.try_get("session_metadata")?,
    })
}

fn map_message(row: &PgRow) -> Result<Message, sqlx::Error> {
    Ok(Message {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        sender: row.try_get("sender")?,
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
        message_type: row.try_get("message_type")?,
        sources: row.try_get("sources")?,
    })
}

fn map_feedback(row: &PgRow) -> Result<Feedback, sqlx::Error> {
    Ok(Feedback {
        id: row.try_get("id")?,
        message_id: row.try_get("message_id")?,
        user_id: row.try_get("user_id")?,
        rating: row.try_get("rating")?,
        comment: row.try_get("comment")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl Store for PgStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO users (username, email, role, password_hash) \
             VALUES ($1, $2, $3, $4) RETURNING {USER_COLUMNS}"
        ))
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.role)
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(map_user(&row)?)
    }

    async fn user_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(map_user).transpose()?)
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(map_user).transpose()?)
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(map_user).transpose()?)
    }

    async fn update_user(&self, id: i64, changes: UserChanges) -> Result<User, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE users SET \
                username = COALESCE($2, username), \
                email = COALESCE($3, email), \
                role = COALESCE($4, role), \
                password_hash = COALESCE($5, password_hash) \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(&changes.username)
        .bind(&changes.email)
        .bind(&changes.role)
        .bind(&changes.password_hash)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound("user"))?;
        Ok(map_user(&row)?)
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| map_user(row).map_err(StoreError::from))
            .collect()
    }

    async fn delete_user(&self, id: i64) -> Result<bool, StoreError> {
        // Sessions, messages and their feedback go with it through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_session(&self, session: NewSession) -> Result<ChatSession, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO chat_sessions (user_id, session_title, session_metadata) \
             VALUES ($1, $2, $3) RETURNING {SESSION_COLUMNS}"
        ))
        .bind(session.user_id)
        .bind(&session.session_title)
        .bind(&session.session_metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| match error {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                StoreError::NotFound("user")
            }
            other => other.into(),
        })?;
        Ok(map_session(&row)?)
    }

    async fn session_by_id(&self, id: i64) -> Result<Option<ChatSession>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(map_session).transpose()?)
    }

    async fn session_ids_for_user(&self, user_id: i64) -> Result<Vec<i64>, StoreError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM chat_sessions WHERE user_id = $1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn update_session(
        &self,
        id: i64,
        changes: SessionChanges,
    ) -> Result<Option<ChatSession>, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE chat_sessions SET \
                session_title = COALESCE($2, session_title), \
                ended_at = COALESCE($3, ended_at) \
             WHERE id = $1 RETURNING {SESSION_COLUMNS}"
        ))
        .bind(id)
        .bind(&changes.session_title)
        .bind(changes.ended_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(map_session).transpose()?)
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO messages (session_id, sender, content, message_type, sources) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(message.session_id)
        .bind(&message.sender)
        .bind(&message.content)
        .bind(&message.message_type)
        .bind(&message.sources)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| match error {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                StoreError::NotFound("chat session")
            }
            other => other.into(),
        })?;
        Ok(map_message(&row)?)
    }

    async fn message_by_id(&self, id: i64) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(map_message).transpose()?)
    }

    async fn messages_for_session(&self, session_id: i64) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE session_id = $1 ORDER BY created_at, id"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| map_message(row).map_err(StoreError::from))
            .collect()
    }

    async fn create_feedback(&self, feedback: NewFeedback) -> Result<Feedback, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO feedbacks (message_id, user_id, rating, comment) \
             VALUES ($1, $2, $3, $4) RETURNING {FEEDBACK_COLUMNS}"
        ))
        .bind(feedback.message_id)
        .bind(feedback.user_id)
        .bind(feedback.rating)
        .bind(&feedback.comment)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| match error {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                StoreError::NotFound("message")
            }
            other => other.into(),
        })?;
        Ok(map_feedback(&row)?)
    }

    async fn feedback_for_message(
        &self,
        message_id: i64,
    ) -> Result<Option<Feedback>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {FEEDBACK_COLUMNS} FROM feedbacks WHERE message_id = $1 ORDER BY id LIMIT 1"
        ))
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(map_feedback).transpose()?)
    }
}
