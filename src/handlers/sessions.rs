use axum::{
    extract::{Path, State},
    Json,
};

use crate::{
    errors::AppError,
    models::SessionCreate,
    state::AppState,
    store::{ChatSession, NewSession, SessionChanges},
};

const DEFAULT_SESSION_TITLE: &str = "New Chat";

pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<SessionCreate>,
) -> Result<Json<ChatSession>, AppError> {
    if state.store.user_by_id(request.user_id).await?.is_none() {
        return Err(AppError::NotFound("User not found".to_owned()));
    }

    let session = state
        .store
        .create_session(NewSession {
            user_id: request.user_id,
            session_title: Some(
                request
                    .session_title
                    .filter(|title| !title.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_SESSION_TITLE.to_owned()),
            ),
            session_metadata: request.session_metadata,
        })
        .await?;
    Ok(Json(session))
}

pub async fn update_session(
    State(state): State<AppState>,
    Path(session_id): Path<i64>,
    Json(changes): Json<SessionChanges>,
) -> Result<Json<ChatSession>, AppError> {
    state
        .store
        .update_session(session_id, changes)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Chat session not found".to_owned()))
}
