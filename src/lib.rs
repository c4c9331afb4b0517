pub mod auth;
pub mod backend;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod state;
pub mod store;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use config::AppConfig;
use state::AppState;
use store::{memory::MemoryStore, postgres::PgStore, NewUser, Store, StoreError};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

const ADMIN_USERNAME: &str = "admin";

pub async fn build_state(config: AppConfig) -> Result<AppState, std::io::Error> {
    let admin_password = config.admin_password.clone();
    let state = match config.database_url.clone() {
        Some(url) => {
            let store = PgStore::connect(&url)
                .await
                .map_err(|error| std::io::Error::other(error.to_string()))?;
            AppState::new(config, Arc::new(store))
        }
        None => {
            warn!("no database configured, records are kept in memory only");
            AppState::new(config, Arc::new(MemoryStore::new()))
        }
    }
    .map_err(std::io::Error::other)?;

    if let Some(password) = admin_password {
        seed_admin(state.store.as_ref(), &password)
            .await
            .map_err(|error| std::io::Error::other(error.to_string()))?;
    }

    info!(
        backend = %state.proxy.kind(),
        host = %state.proxy.upstream().ollama_host,
        store = state.store.name(),
        "chat backend configured"
    );
    Ok(state)
}

/// Creates the `admin` account unless one already exists.
pub async fn seed_admin(store: &dyn Store, password: &str) -> Result<(), StoreError> {
    if store.user_by_username(ADMIN_USERNAME).await?.is_some() {
        return Ok(());
    }
    store
        .create_user(NewUser {
            username: ADMIN_USERNAME.to_owned(),
            email: None,
            role: "admin".to_owned(),
            password_hash: auth::hash_password(password),
        })
        .await?;
    info!(username = ADMIN_USERNAME, "admin user seeded");
    Ok(())
}

pub fn build_app(state: AppState) -> Router {
    let api = routes(state.clone());
    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::root))
        .route("/chat", post(handlers::chat::chat))
        .route("/models", get(handlers::chat::list_models))
        .route("/modeldetails", post(handlers::chat::model_details))
        .route("/users/register", post(handlers::users::register))
        .route("/users/token", post(handlers::users::issue_token))
        .route(
            "/users/me",
            get(handlers::users::me).put(handlers::users::update_me),
        )
        .route("/users/sessions", get(handlers::users::my_sessions))
        .route(
            "/users",
            get(handlers::users::list_users).post(handlers::users::create_user),
        )
        .route(
            "/users/:user_id",
            get(handlers::users::get_user)
                .put(handlers::users::update_user)
                .delete(handlers::users::delete_user),
        )
        .route("/sessions", post(handlers::sessions::create_session))
        .route("/sessions/:session_id", put(handlers::sessions::update_session))
        .route("/messages/save", post(handlers::messages::save_message))
        .route("/messages/save-response", post(handlers::messages::save_response))
        .route(
            "/messages/get-session/:session_id",
            get(handlers::messages::session_messages),
        )
        .route("/messages/save-feedback", post(handlers::messages::save_feedback))
        .route(
            "/messages/get-feedback/:message_id",
            get(handlers::messages::message_feedback),
        )
        .route_layer(middleware::from_fn_with_state(
            state,
            handlers::track_requests,
        ))
}
