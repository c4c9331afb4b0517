use axum::{
    extract::{Path, State},
    Json,
};

use crate::{
    errors::AppError,
    models::{FeedbackCreate, MessageCreate, MessageResponse, SessionMessagesResponse},
    state::AppState,
    store::{Feedback, NewFeedback, NewMessage},
};

const ASSISTANT_SENDER: &str = "assistant";

pub async fn save_message(
    State(state): State<AppState>,
    Json(message): Json<MessageCreate>,
) -> Result<Json<MessageResponse>, AppError> {
    store_message(&state, message).await.map(Json)
}

/// Same as [`save_message`], restricted to model output.
pub async fn save_response(
    State(state): State<AppState>,
    Json(message): Json<MessageCreate>,
) -> Result<Json<MessageResponse>, AppError> {
    if message.sender != ASSISTANT_SENDER {
        return Err(AppError::BadRequest(
            "Invalid sender, must be 'assistant'".to_owned(),
        ));
    }
    store_message(&state, message).await.map(Json)
}

pub async fn session_messages(
    State(state): State<AppState>,
    Path(session_id): Path<i64>,
) -> Result<Json<SessionMessagesResponse>, AppError> {
    if state.store.session_by_id(session_id).await?.is_none() {
        return Err(AppError::NotFound("Chat session not found".to_owned()));
    }

    let messages = state
        .store
        .messages_for_session(session_id)
        .await?
        .into_iter()
        .map(MessageResponse::from)
        .collect();
    Ok(Json(SessionMessagesResponse {
        session_id,
        messages,
    }))
}

pub async fn save_feedback(
    State(state): State<AppState>,
    Json(feedback): Json<FeedbackCreate>,
) -> Result<Json<Feedback>, AppError> {
    if !(1..=5).contains(&feedback.rating) {
        return Err(AppError::BadRequest(
            "Rating must be between 1 and 5".to_owned(),
        ));
    }
    if state.store.message_by_id(feedback.message_id).await?.is_none() {
        return Err(AppError::NotFound("Message not found".to_owned()));
    }

    let feedback = state
        .store
        .create_feedback(NewFeedback {
            message_id: feedback.message_id,
            user_id: feedback.user_id,
            rating: feedback.rating,
            comment: feedback.comment,
        })
        .await?;
    Ok(Json(feedback))
}

pub async fn message_feedback(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
) -> Result<Json<Feedback>, AppError> {
    state
        .store
        .feedback_for_message(message_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Feedback not found".to_owned()))
}

async fn store_message(
    state: &AppState,
    message: MessageCreate,
) -> Result<MessageResponse, AppError> {
    if state.store.session_by_id(message.session_id).await?.is_none() {
        return Err(AppError::NotFound("Chat session not found".to_owned()));
    }

    let message = state
        .store
        .create_message(NewMessage {
            session_id: message.session_id,
            sender: message.sender,
            content: message.content,
            message_type: message
                .message_type
                .unwrap_or_else(|| "text".to_owned()),
            sources: message.sources,
        })
        .await?;
    Ok(MessageResponse::from(message))
}
