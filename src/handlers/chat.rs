use axum::{
    body::{Body, Bytes},
    extract::State,
    http::header::{CACHE_CONTROL, CONTENT_TYPE},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::StreamExt;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    backend::{
        catalog::{fallback_catalog, placeholder_details, ModelSummary},
        ProxyError,
    },
    errors::AppError,
    models::{ChatBody, ChatErrorBody, ModelDetailsRequest},
    state::AppState,
};

/// Relays model output as a plain concatenation of fragments.
///
/// Proxy failures come back as a `{error, message, suggestion}` payload with
/// a 200 status, which is what existing clients check for.
pub async fn chat(State(state): State<AppState>, Json(body): Json<ChatBody>) -> Response {
    let request = match body.into_request(&state.config.chat_defaults) {
        Ok(request) => request,
        Err(message) => return AppError::BadRequest(message).into_response(),
    };

    info!(
        backend = %state.proxy.kind(),
        model = request.model(),
        temperature = request.temperature(),
        "chat request accepted"
    );

    let mut upstream = match state.proxy.stream(request).await {
        Ok(stream) => stream,
        Err(error) => {
            state.metrics.observe_upstream_error(error.stage());
            warn!(error = %error, "chat proxy failed before streaming");
            return Json(ChatErrorBody::from_proxy(&error, state.proxy.upstream())).into_response();
        }
    };

    let guard = state.metrics.stream_guard();
    let metrics = state.metrics.clone();
    let outbound = async_stream::stream! {
        let _guard = guard;
        while let Some(next) = upstream.next().await {
            match next {
                Ok(fragment) => {
                    metrics.observe_fragment();
                    yield Ok::<Bytes, ProxyError>(Bytes::from(fragment));
                }
                Err(error) => {
                    metrics.observe_upstream_error(error.stage());
                    warn!(error = %error, "chat stream aborted");
                    yield Err(error);
                    break;
                }
            }
        }
    };

    (
        [
            (CONTENT_TYPE, "text/event-stream"),
            (CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(outbound),
    )
        .into_response()
}

pub async fn list_models(State(state): State<AppState>) -> Json<Vec<ModelSummary>> {
    match state.catalog.list_models().await {
        Ok(models) => {
            info!(count = models.len(), "serving live model catalog");
            Json(models)
        }
        Err(error) => {
            state.metrics.observe_catalog_fallback("models");
            warn!(error = %error, "model discovery failed, serving fallback catalog");
            Json(fallback_catalog())
        }
    }
}

pub async fn model_details(
    State(state): State<AppState>,
    Json(request): Json<ModelDetailsRequest>,
) -> Result<Json<Value>, AppError> {
    let name = request
        .name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Model name is required".to_owned()))?;

    match state.catalog.model_details(&name).await {
        Ok(details) => Ok(Json(details)),
        Err(error) => {
            state.metrics.observe_catalog_fallback("modeldetails");
            warn!(model = %name, error = %error, "model details unavailable, serving placeholder");
            Ok(Json(placeholder_details()))
        }
    }
}
