use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap},
    Form, Json,
};
use serde_json::{json, Value};
use tracing::info;

use crate::{
    auth::{hash_password, verify_password},
    errors::AppError,
    models::{LoginForm, RegisterRequest, TokenResponse, UserUpdate},
    state::AppState,
    store::{NewUser, User, UserChanges},
};

const DEFAULT_ROLE: &str = "user";
const ADMIN_ROLE: &str = "admin";

/// Open self-registration. Roles other than the default need an admin token.
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<User>, AppError> {
    let role = match request.role.as_deref() {
        None | Some(DEFAULT_ROLE) => DEFAULT_ROLE.to_owned(),
        Some(role) => {
            if !caller_is_admin(&state, &headers).await? {
                return Err(AppError::Forbidden(
                    "Only administrators can assign roles".to_owned(),
                ));
            }
            role.to_owned()
        }
    };
    insert_user(&state, request, role).await.map(Json)
}

pub async fn issue_token(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Json<TokenResponse>, AppError> {
    let user = state
        .store
        .user_by_username(&form.username)
        .await?
        .filter(|user| verify_password(&form.password, &user.password_hash))
        .ok_or_else(|| AppError::Unauthorized("Incorrect username or password".to_owned()))?;

    let access_token = state.tokens.issue(user.id).await;
    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".to_owned(),
    }))
}

pub async fn me(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<User>, AppError> {
    Ok(Json(current_user(&state, &headers).await?))
}

pub async fn update_me(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<UserUpdate>,
) -> Result<Json<User>, AppError> {
    let user = current_user(&state, &headers).await?;
    // Role changes are silently ignored for non-admins.
    let allow_role = user.role == ADMIN_ROLE;
    apply_update(&state, user.id, update, allow_role)
        .await
        .map(Json)
}

pub async fn my_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<i64>>, AppError> {
    let user = current_user(&state, &headers).await?;
    Ok(Json(state.store.session_ids_for_user(user.id).await?))
}

pub async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<User>>, AppError> {
    require_admin(&state, &headers).await?;
    Ok(Json(state.store.list_users().await?))
}

pub async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<User>, AppError> {
    require_admin(&state, &headers).await?;
    let role = request
        .role
        .clone()
        .filter(|role| !role.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ROLE.to_owned());
    insert_user(&state, request, role).await.map(Json)
}

pub async fn get_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<i64>,
) -> Result<Json<User>, AppError> {
    require_admin(&state, &headers).await?;
    state
        .store
        .user_by_id(user_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("User not found".to_owned()))
}

pub async fn update_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<i64>,
    Json(update): Json<UserUpdate>,
) -> Result<Json<User>, AppError> {
    require_admin(&state, &headers).await?;
    if update.username.is_none()
        && update.email.is_none()
        && update.password.is_none()
        && update.role.is_none()
    {
        return Err(AppError::BadRequest("No fields to update provided".to_owned()));
    }
    if state.store.user_by_id(user_id).await?.is_none() {
        return Err(AppError::NotFound("User not found".to_owned()));
    }
    apply_update(&state, user_id, update, true).await.map(Json)
}

pub async fn delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let admin = require_admin(&state, &headers).await?;
    if !state.store.delete_user(user_id).await? {
        return Err(AppError::NotFound("User not found".to_owned()));
    }
    info!(user_id, by = admin.id, "user deleted");
    Ok(Json(json!({ "message": "User deleted successfully" })))
}

async fn insert_user(
    state: &AppState,
    request: RegisterRequest,
    role: String,
) -> Result<User, AppError> {
    let username = validated_username(&request.username)?;
    if request.password.is_empty() {
        return Err(AppError::BadRequest("Password is required".to_owned()));
    }
    let email = request.email.filter(|email| !email.trim().is_empty());
    if let Some(email) = &email {
        validate_email(email)?;
    }

    if state.store.user_by_username(&username).await?.is_some() {
        return Err(AppError::BadRequest("Username already registered".to_owned()));
    }
    if let Some(email) = &email {
        if state.store.user_by_email(email).await?.is_some() {
            return Err(AppError::BadRequest("Email already registered".to_owned()));
        }
    }

    let user = state
        .store
        .create_user(NewUser {
            username,
            email,
            role,
            password_hash: hash_password(&request.password),
        })
        .await?;

    info!(user_id = user.id, username = %user.username, role = %user.role, "user registered");
    Ok(user)
}

async fn apply_update(
    state: &AppState,
    user_id: i64,
    update: UserUpdate,
    allow_role: bool,
) -> Result<User, AppError> {
    let mut changes = UserChanges::default();

    if let Some(username) = update.username {
        let username = validated_username(&username)?;
        if let Some(existing) = state.store.user_by_username(&username).await? {
            if existing.id != user_id {
                return Err(AppError::BadRequest("Username already registered".to_owned()));
            }
        }
        changes.username = Some(username);
    }

    if let Some(email) = update.email {
        validate_email(&email)?;
        if let Some(existing) = state.store.user_by_email(&email).await? {
            if existing.id != user_id {
                return Err(AppError::BadRequest("Email already registered".to_owned()));
            }
        }
        changes.email = Some(email);
    }

    if let Some(password) = update.password.filter(|password| !password.is_empty()) {
        changes.password_hash = Some(hash_password(&password));
    }

    if allow_role {
        changes.role = update.role.filter(|role| !role.trim().is_empty());
    }

    Ok(state.store.update_user(user_id, changes).await?)
}

async fn current_user(state: &AppState, headers: &HeaderMap) -> Result<User, AppError> {
    let user_id = state.tokens.authenticate(headers).await?;
    state
        .store
        .user_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Could not validate credentials".to_owned()))
}

async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<User, AppError> {
    let user = current_user(state, headers).await?;
    if user.role != ADMIN_ROLE {
        return Err(AppError::Forbidden("Not enough permissions".to_owned()));
    }
    Ok(user)
}

/// Anonymous callers are not admins; a presented but invalid token is still rejected.
async fn caller_is_admin(state: &AppState, headers: &HeaderMap) -> Result<bool, AppError> {
    if !headers.contains_key(AUTHORIZATION) {
        return Ok(false);
    }
    Ok(current_user(state, headers).await?.role == ADMIN_ROLE)
}

fn validated_username(username: &str) -> Result<String, AppError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(AppError::BadRequest("Username is required".to_owned()));
    }
    Ok(username.to_owned())
}

fn validate_email(email: &str) -> Result<(), AppError> {
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if valid {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!("Invalid email address: {email}")))
    }
}
