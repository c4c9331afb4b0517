pub mod catalog;
pub mod decoder;
pub mod payload;
pub mod proxy;

use std::fmt;

use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::config::{trim_host, UpstreamConfig, DEFAULT_OLLAMA_HOST};
use decoder::{LineJsonDecoder, SseDecoder, StreamDecoder};

/// One decoded piece of model output, in upstream order.
pub type Fragment = String;

pub type FragmentStream = BoxStream<'static, Result<Fragment, ProxyError>>;

/// Wire dialect spoken by the configured model host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Ollama's `/api/generate`, newline-delimited JSON objects.
    OllamaNative,
    /// LMStudio and friends: `/v1/chat/completions` over SSE `data:` frames.
    OpenAiChatCompatible,
}

impl BackendKind {
    pub fn resolve(upstream: &UpstreamConfig) -> Self {
        if trim_host(&upstream.ollama_host) == trim_host(&upstream.lmstudio_host) {
            BackendKind::OpenAiChatCompatible
        } else {
            BackendKind::OllamaNative
        }
    }

    pub fn base_url(self, upstream: &UpstreamConfig) -> &str {
        match self {
            BackendKind::OllamaNative => trim_host(&upstream.ollama_host),
            BackendKind::OpenAiChatCompatible => trim_host(&upstream.lmstudio_host),
        }
    }

    pub fn chat_path(self) -> &'static str {
        match self {
            BackendKind::OllamaNative => "/api/generate",
            BackendKind::OpenAiChatCompatible => "/v1/chat/completions",
        }
    }

    pub fn models_path(self) -> &'static str {
        match self {
            BackendKind::OllamaNative => "/api/tags",
            BackendKind::OpenAiChatCompatible => "/v1/models",
        }
    }

    pub fn decoder(self) -> Box<dyn StreamDecoder> {
        match self {
            BackendKind::OllamaNative => Box::new(LineJsonDecoder::default()),
            BackendKind::OpenAiChatCompatible => Box::new(SseDecoder::default()),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::OllamaNative => f.write_str("Ollama"),
            BackendKind::OpenAiChatCompatible => f.write_str("LMStudio"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Connection error: Could not connect to {kind} at {host}. {cause}")]
    ConnectionFailed {
        kind: BackendKind,
        host: String,
        cause: String,
    },
    #[error("{message}")]
    UpstreamHttp { status: u16, message: String },
    #[error("Error: {0}")]
    Unexpected(String),
}

impl ProxyError {
    /// Remediation hint shown next to the error message.
    pub fn suggestion(&self, upstream: &UpstreamConfig) -> String {
        match self {
            ProxyError::ConnectionFailed { kind, host, .. } if upstream.ollama_host_overridden() => {
                match kind {
                    BackendKind::OllamaNative => format!(
                        "Try removing the OLLAMA_HOST environment variable or setting it to {DEFAULT_OLLAMA_HOST}"
                    ),
                    BackendKind::OpenAiChatCompatible => format!(
                        "Check that the LMStudio server is running at {host}, or remove the OLLAMA_HOST environment variable to use Ollama at {DEFAULT_OLLAMA_HOST}"
                    ),
                }
            }
            ProxyError::UpstreamHttp { status: 404, .. } => {
                "Check that the requested model is installed on the model server".to_owned()
            }
            _ => "Check if Ollama is running and accessible".to_owned(),
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            ProxyError::ConnectionFailed { .. } => "connect",
            ProxyError::UpstreamHttp { .. } => "status",
            ProxyError::Unexpected(_) => "stream",
        }
    }
}
