use std::error::Error as StdError;

use futures_util::StreamExt;
use reqwest::{
    header::{ACCEPT, CACHE_CONTROL, PRAGMA},
    StatusCode,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    backend::{
        payload::{self, ChatRequest},
        BackendKind, FragmentStream, ProxyError,
    },
    config::UpstreamConfig,
};

/// Streams one chat request through the configured model host.
#[derive(Clone)]
pub struct ChatProxy {
    client: reqwest::Client,
    upstream: UpstreamConfig,
    kind: BackendKind,
}

impl ChatProxy {
    pub fn new(upstream: UpstreamConfig) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(upstream.timeout)
            .build()
            .map_err(|error| format!("failed to build chat HTTP client: {error}"))?;

        Ok(Self {
            client,
            kind: BackendKind::resolve(&upstream),
            upstream,
        })
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn upstream(&self) -> &UpstreamConfig {
        &self.upstream
    }

    /// Opens the upstream call and returns the decoded fragment stream.
    ///
    /// Connection and status failures surface here, before any fragment is
    /// produced. Dropping the returned stream closes the upstream connection.
    pub async fn stream(&self, request: ChatRequest) -> Result<FragmentStream, ProxyError> {
        let (url, payload) = payload::build(self.kind, &self.upstream, &request);
        debug!(backend = %self.kind, url = %url, model = request.model(), "opening upstream stream");

        let response = self
            .client
            .post(&url)
            .header(ACCEPT, "application/json")
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .json(&payload)
            .send()
            .await
            .map_err(|error| self.send_error(&error))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            let error = upstream_http_error(status, &body);
            warn!(backend = %self.kind, status = status.as_u16(), error = %error, "upstream rejected chat request");
            return Err(error);
        }

        let mut upstream = response.bytes_stream();
        let mut decoder = self.kind.decoder();
        let backend = self.kind;

        let stream = async_stream::stream! {
            while let Some(next) = upstream.next().await {
                let bytes = match next {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        warn!(backend = %backend, error = %describe(&error), "upstream stream interrupted");
                        yield Err(ProxyError::Unexpected(describe(&error)));
                        break;
                    }
                };

                for fragment in decoder.decode(&bytes) {
                    yield Ok(fragment);
                }
            }

            for fragment in decoder.finish() {
                yield Ok(fragment);
            }
            debug!(backend = %backend, "upstream stream closed");
        };

        Ok(stream.boxed())
    }

    fn send_error(&self, error: &reqwest::Error) -> ProxyError {
        if error.is_builder() {
            return ProxyError::Unexpected(describe(error));
        }
        ProxyError::ConnectionFailed {
            kind: self.kind,
            host: self.kind.base_url(&self.upstream).to_owned(),
            cause: describe(error),
        }
    }
}

/// Best-effort extraction of the upstream's `error` field.
pub(crate) fn upstream_http_error(status: StatusCode, body: &str) -> ProxyError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("error").map(error_text))
        .unwrap_or_else(|| format!("HTTP error {}", status.as_u16()));

    ProxyError::UpstreamHttp {
        status: status.as_u16(),
        message,
    }
}

fn error_text(error: &Value) -> String {
    match error {
        Value::String(message) => message.clone(),
        other => other
            .get("message")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| other.to_string()),
    }
}

/// Flattens an error and its sources into one line.
pub(crate) fn describe(error: &(dyn StdError + 'static)) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !text.contains(&cause_text) {
            text.push_str(": ");
            text.push_str(&cause_text);
        }
        source = cause.source();
    }
    text
}
