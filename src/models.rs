use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    backend::{payload::ChatRequest, ProxyError},
    config::{ChatDefaults, UpstreamConfig},
    store::Message,
};

#[derive(Debug, Clone, Deserialize)]
pub struct ChatBody {
    pub model: String,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub options: Option<ChatOptions>,
    pub prompt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatOptions {
    #[serde(default)]
    pub temperature: Option<f64>,
}

impl ChatBody {
    /// Fills in the configured system prompt and temperature where the caller left them out.
    pub fn into_request(self, defaults: &ChatDefaults) -> Result<ChatRequest, String> {
        let system = self
            .system
            .filter(|system| !system.is_empty())
            .unwrap_or_else(|| defaults.system_prompt.clone());
        let temperature = self
            .options
            .and_then(|options| options.temperature)
            .unwrap_or(defaults.temperature);

        ChatRequest::new(self.model, system, temperature, self.prompt)
    }
}

/// Returned with a success status when the chat proxy fails.
#[derive(Debug, Serialize)]
pub struct ChatErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ChatErrorBody {
    pub fn from_proxy(error: &ProxyError, upstream: &UpstreamConfig) -> Self {
        Self {
            error: "Ollama Error".to_owned(),
            message: error.to_string(),
            suggestion: Some(error.suggestion(upstream)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ModelDetailsRequest {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserUpdate {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionCreate {
    pub user_id: i64,
    #[serde(default)]
    pub session_title: Option<String>,
    #[serde(default)]
    pub session_metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct MessageCreate {
    pub session_id: i64,
    pub sender: String,
    pub content: String,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub sources: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: i64,
    pub content: String,
    pub sender: String,
    pub created_at: DateTime<Utc>,
    pub message_type: String,
    pub sources: Option<Value>,
}

impl From<Message> for MessageResponse {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            content: message.content,
            sender: message.sender,
            created_at: message.created_at,
            message_type: message.message_type,
            sources: message.sources,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionMessagesResponse {
    pub session_id: i64,
    pub messages: Vec<MessageResponse>,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackCreate {
    pub message_id: i64,
    pub rating: i32,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub user_id: Option<i64>,
}
