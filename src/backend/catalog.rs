use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::{
    backend::{
        proxy::{describe, upstream_http_error},
        BackendKind, ProxyError,
    },
    config::UpstreamConfig,
};

pub const CATALOG_TIMEOUT: Duration = Duration::from_secs(10);
const UNKNOWN_MODIFIED_AT: &str = "2023-01-01T00:00:00Z";
const DEFAULT_MODEL: &str = "llama2";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub id: String,
    pub name: String,
    pub modified_at: String,
    pub size: u64,
}

impl ModelSummary {
    fn unknown(name: &str) -> Self {
        Self {
            id: name.to_owned(),
            name: name.to_owned(),
            modified_at: UNKNOWN_MODIFIED_AT.to_owned(),
            size: 0,
        }
    }
}

/// Served when live model discovery fails.
pub fn fallback_catalog() -> Vec<ModelSummary> {
    vec![ModelSummary::unknown(DEFAULT_MODEL), ModelSummary::unknown("mistral")]
}

/// Served for hosts without a details endpoint and when the lookup fails.
pub fn placeholder_details() -> Value {
    json!({
        "license": "Unknown",
        "modelfile": "",
        "parameters": "Unknown",
        "template": "{{ .System }}\n\n{{ .Prompt }}",
        "system": "You are a helpful assistant."
    })
}

/// Model discovery against the configured host.
#[derive(Clone)]
pub struct ModelCatalog {
    client: reqwest::Client,
    upstream: UpstreamConfig,
    kind: BackendKind,
}

impl ModelCatalog {
    pub fn new(upstream: UpstreamConfig) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(CATALOG_TIMEOUT)
            .build()
            .map_err(|error| format!("failed to build catalog HTTP client: {error}"))?;

        Ok(Self {
            client,
            kind: BackendKind::resolve(&upstream),
            upstream,
        })
    }

    pub async fn list_models(&self) -> Result<Vec<ModelSummary>, ProxyError> {
        let url = self.url(self.kind.models_path());
        info!(backend = %self.kind, url = %url, "fetching model catalog");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|error| self.connect_error(&error))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(upstream_http_error(status, &body));
        }

        let body = response
            .text()
            .await
            .map_err(|error| ProxyError::Unexpected(describe(&error)))?;
        let models = parse_catalog(self.kind, &body).map_err(|error| {
            ProxyError::Unexpected(format!("Failed to parse response from {url}: {error}"))
        })?;

        debug!(backend = %self.kind, count = models.len(), "model catalog fetched");
        Ok(models)
    }

    pub async fn model_details(&self, name: &str) -> Result<Value, ProxyError> {
        if self.kind == BackendKind::OpenAiChatCompatible {
            return Ok(placeholder_details());
        }

        let url = self.url("/api/show");
        let response = self
            .client
            .post(&url)
            .json(&json!({ "name": name }))
            .send()
            .await
            .map_err(|error| self.connect_error(&error))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(upstream_http_error(status, &body));
        }

        response
            .json::<Value>()
            .await
            .map_err(|error| ProxyError::Unexpected(describe(&error)))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.kind.base_url(&self.upstream), path)
    }

    fn connect_error(&self, error: &reqwest::Error) -> ProxyError {
        warn!(backend = %self.kind, error = %describe(error), "model host unreachable");
        ProxyError::ConnectionFailed {
            kind: self.kind,
            host: self.kind.base_url(&self.upstream).to_owned(),
            cause: describe(error),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiModelList {
    #[serde(default)]
    data: Vec<OpenAiModel>,
}

#[derive(Debug, Deserialize)]
struct OpenAiModel {
    id: String,
}

#[derive(Debug, Deserialize)]
struct OllamaTags {
    #[serde(default)]
    models: Vec<OllamaTag>,
}

#[derive(Debug, Deserialize)]
struct OllamaTag {
    name: String,
    #[serde(default)]
    modified_at: Option<String>,
    #[serde(default)]
    size: Option<u64>,
}

fn parse_catalog(kind: BackendKind, body: &str) -> Result<Vec<ModelSummary>, serde_json::Error> {
    match kind {
        BackendKind::OpenAiChatCompatible => {
            let list: OpenAiModelList = serde_json::from_str(body)?;
            Ok(list
                .data
                .into_iter()
                .map(|model| ModelSummary::unknown(&model.id))
                .collect())
        }
        BackendKind::OllamaNative => {
            let tags: OllamaTags = serde_json::from_str(body)?;
            let models = tags
                .models
                .into_iter()
                .map(|tag| ModelSummary {
                    id: tag.name.clone(),
                    name: tag.name,
                    modified_at: tag
                        .modified_at
                        .unwrap_or_else(|| UNKNOWN_MODIFIED_AT.to_owned()),
                    size: tag.size.unwrap_or(0),
                })
                .collect::<Vec<_>>();

            if models.is_empty() {
                warn!("model host reported no models, using default entry");
                return Ok(vec![ModelSummary::unknown(DEFAULT_MODEL)]);
            }
            Ok(models)
        }
    }
}
