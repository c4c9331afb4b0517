use serde::Serialize;

use crate::{backend::BackendKind, config::UpstreamConfig};

/// A validated chat turn ready to be sent upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    model: String,
    system_prompt: String,
    temperature: f64,
    user_prompt: String,
}

impl ChatRequest {
    pub fn new(
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        temperature: f64,
        user_prompt: impl Into<String>,
    ) -> Result<Self, String> {
        let model = model.into();
        if model.trim().is_empty() {
            return Err("model is required".to_owned());
        }

        Ok(Self {
            model,
            system_prompt: system_prompt.into(),
            temperature,
            user_prompt: user_prompt.into(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn user_prompt(&self) -> &str {
        &self.user_prompt
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum OutboundPayload {
    OpenAiChat(OpenAiChatPayload),
    OllamaGenerate(OllamaGeneratePayload),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OpenAiChatPayload {
    pub model: String,
    pub messages: Vec<ChatTurn>,
    pub temperature: f64,
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatTurn {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OllamaGeneratePayload {
    pub model: String,
    pub prompt: String,
    pub system: String,
    pub options: OllamaOptions,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OllamaOptions {
    pub temperature: f64,
}

/// Target URL and body for one chat request against the selected dialect.
pub fn build(
    kind: BackendKind,
    upstream: &UpstreamConfig,
    request: &ChatRequest,
) -> (String, OutboundPayload) {
    let url = format!("{}{}", kind.base_url(upstream), kind.chat_path());
    let payload = match kind {
        BackendKind::OpenAiChatCompatible => OutboundPayload::OpenAiChat(OpenAiChatPayload {
            model: request.model.clone(),
            messages: vec![
                ChatTurn {
                    role: "system",
                    content: request.system_prompt.clone(),
                },
                ChatTurn {
                    role: "user",
                    content: request.user_prompt.clone(),
                },
            ],
            temperature: request.temperature,
            stream: true,
        }),
        BackendKind::OllamaNative => OutboundPayload::OllamaGenerate(OllamaGeneratePayload {
            model: request.model.clone(),
            prompt: request.user_prompt.clone(),
            system: request.system_prompt.clone(),
            options: OllamaOptions {
                temperature: request.temperature,
            },
        }),
    };

    (url, payload)
}
