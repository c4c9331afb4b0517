use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use local_chat_backend::{build_app, config::UpstreamConfig, seed_admin, state::AppState};
use serde_json::{json, Value};
use tower::util::ServiceExt;

fn test_app() -> Router {
    build_app(AppState::new_for_tests(UpstreamConfig::default()))
}

/// App with an `admin` account whose password is `s3cret`.
async fn app_with_admin() -> Router {
    let state = AppState::new_for_tests(UpstreamConfig::default());
    seed_admin(state.store.as_ref(), "s3cret")
        .await
        .expect("seed admin");
    build_app(state)
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone()
        .oneshot(request)
        .await
        .expect("request execution")
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request build")
}

fn authorized(method: &str, uri: &str, token: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {token}"));
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    };
    request.expect("request build")
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

async fn register(app: &Router, username: &str, email: &str) -> Value {
    let response = send(
        app,
        json_request(
            "POST",
            "/users/register",
            json!({ "username": username, "password": "s3cret", "email": email }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

async fn login(app: &Router, username: &str, password: &str) -> Response {
    send(
        app,
        Request::builder()
            .method("POST")
            .uri("/users/token")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(format!("username={username}&password={password}")))
            .expect("request build"),
    )
    .await
}

async fn token_for(app: &Router, username: &str) -> String {
    let response = login(app, username, "s3cret").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["token_type"], "bearer");
    body["access_token"]
        .as_str()
        .expect("access token")
        .to_owned()
}

#[tokio::test]
async fn registered_user_can_log_in_and_read_profile() {
    let app = test_app();
    let user = register(&app, "ada", "ada@example.com").await;
    assert_eq!(user["role"], "user");
    assert!(user.get("password_hash").is_none());

    let token = token_for(&app, "ada").await;
    let response = send(&app, authorized("GET", "/users/me", &token, None)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let me = body_json(response).await;
    assert_eq!(me["username"], "ada");
    assert_eq!(me["email"], "ada@example.com");
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let app = test_app();
    register(&app, "ada", "ada@example.com").await;

    let response = send(
        &app,
        json_request(
            "POST",
            "/users/register",
            json!({ "username": "ada", "password": "other" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["detail"], "Username already registered");

    let response = send(
        &app,
        json_request(
            "POST",
            "/users/register",
            json!({ "username": "grace", "password": "other", "email": "ada@example.com" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["detail"], "Email already registered");
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let app = test_app();
    register(&app, "ada", "ada@example.com").await;

    let response = login(&app, "ada", "nope").await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response
            .headers()
            .get("www-authenticate")
            .and_then(|value| value.to_str().ok()),
        Some("Bearer")
    );
}

#[tokio::test]
async fn profile_requires_a_token() {
    let app = test_app();

    let response = send(
        &app,
        Request::builder()
            .uri("/users/me")
            .body(Body::empty())
            .expect("request build"),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn regular_user_cannot_promote_themselves() {
    let app = test_app();
    register(&app, "ada", "ada@example.com").await;
    let token = token_for(&app, "ada").await;

    let response = send(
        &app,
        authorized(
            "PUT",
            "/users/me",
            &token,
            Some(json!({ "email": "lovelace@example.com", "role": "admin" })),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let updated = body_json(response).await;
    assert_eq!(updated["email"], "lovelace@example.com");
    assert_eq!(updated["role"], "user");
}

#[tokio::test]
async fn anonymous_registration_cannot_claim_admin_role() {
    let app = test_app();

    let response = send(
        &app,
        json_request(
            "POST",
            "/users/register",
            json!({ "username": "mallory", "password": "pw", "role": "admin" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send(
        &app,
        json_request(
            "POST",
            "/users/register",
            json!({ "username": "mallory", "password": "pw", "role": "user" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["role"], "user");
}

#[tokio::test]
async fn admin_token_allows_registering_with_a_role() {
    let app = app_with_admin().await;
    let token = token_for(&app, "admin").await;

    let response = send(
        &app,
        authorized(
            "POST",
            "/users/register",
            &token,
            Some(json!({ "username": "grace", "password": "pw", "role": "admin" })),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["role"], "admin");
}

#[tokio::test]
async fn blank_username_update_is_rejected() {
    let app = test_app();
    register(&app, "ada", "ada@example.com").await;
    let token = token_for(&app, "ada").await;

    let response = send(
        &app,
        authorized("PUT", "/users/me", &token, Some(json!({ "username": "   " }))),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["detail"], "Username is required");

    let response = send(&app, authorized("GET", "/users/me", &token, None)).await;
    assert_eq!(body_json(response).await["username"], "ada");
}

#[tokio::test]
async fn user_management_requires_an_admin() {
    let app = app_with_admin().await;
    register(&app, "ada", "ada@example.com").await;
    let token = token_for(&app, "ada").await;

    let response = send(&app, authorized("GET", "/users", &token, None)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send(&app, authorized("DELETE", "/users/1", &token, None)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send(
        &app,
        Request::builder()
            .uri("/users")
            .body(Body::empty())
            .expect("request build"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_manages_users_by_id() {
    let app = app_with_admin().await;
    let token = token_for(&app, "admin").await;

    let response = send(
        &app,
        authorized(
            "POST",
            "/users",
            &token,
            Some(json!({ "username": "grace", "password": "pw", "email": "grace@example.com", "role": "editor" })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let grace = body_json(response).await;
    assert_eq!(grace["role"], "editor");
    let grace_id = grace["id"].as_i64().expect("user id");

    let response = send(&app, authorized("GET", "/users", &token, None)).await;
    let usernames = body_json(response)
        .await
        .as_array()
        .expect("user list")
        .iter()
        .map(|user| user["username"].as_str().unwrap_or_default().to_owned())
        .collect::<Vec<_>>();
    assert_eq!(usernames, ["admin", "grace"]);

    let response = send(
        &app,
        authorized("PUT", &format!("/users/{grace_id}"), &token, Some(json!({}))),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["detail"], "No fields to update provided");

    let response = send(
        &app,
        authorized(
            "PUT",
            &format!("/users/{grace_id}"),
            &token,
            Some(json!({ "username": "admin" })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        authorized(
            "PUT",
            &format!("/users/{grace_id}"),
            &token,
            Some(json!({ "role": "user", "password": "new-pw" })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["role"], "user");
    assert_eq!(login(&app, "grace", "new-pw").await.status(), StatusCode::OK);

    let response = send(&app, authorized("GET", &format!("/users/{grace_id}"), &token, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["email"], "grace@example.com");

    let response = send(
        &app,
        authorized("DELETE", &format!("/users/{grace_id}"), &token, None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await["message"],
        "User deleted successfully"
    );

    let response = send(&app, authorized("GET", &format!("/users/{grace_id}"), &token, None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["detail"], "User not found");

    let response = send(
        &app,
        authorized("DELETE", &format!("/users/{grace_id}"), &token, None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn chat_history_round_trip() {
    let app = test_app();
    let user = register(&app, "ada", "ada@example.com").await;
    let user_id = user["id"].as_i64().expect("user id");
    let token = token_for(&app, "ada").await;

    let response = send(
        &app,
        json_request("POST", "/sessions", json!({ "user_id": user_id })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let session = body_json(response).await;
    assert_eq!(session["session_title"], "New Chat");
    let session_id = session["id"].as_i64().expect("session id");

    let response = send(
        &app,
        json_request(
            "POST",
            "/messages/save",
            json!({ "session_id": session_id, "sender": "user", "content": "hi" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["message_type"], "text");

    let response = send(
        &app,
        json_request(
            "POST",
            "/messages/save-response",
            json!({ "session_id": session_id, "sender": "assistant", "content": "hello!" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let reply_id = body_json(response).await["id"].as_i64().expect("message id");

    let response = send(
        &app,
        json_request(
            "PUT",
            &format!("/sessions/{session_id}"),
            json!({ "session_title": "Greetings" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["session_title"], "Greetings");

    let response = send(
        &app,
        Request::builder()
            .uri(format!("/messages/get-session/{session_id}"))
            .body(Body::empty())
            .expect("request build"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let history = body_json(response).await;
    assert_eq!(history["session_id"], session_id);
    let contents = history["messages"]
        .as_array()
        .expect("messages")
        .iter()
        .map(|message| message["content"].as_str().unwrap_or_default().to_owned())
        .collect::<Vec<_>>();
    assert_eq!(contents, ["hi", "hello!"]);

    let response = send(
        &app,
        json_request(
            "POST",
            "/messages/save-feedback",
            json!({ "message_id": reply_id, "rating": 5, "comment": "nice", "user_id": user_id }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(
        &app,
        Request::builder()
            .uri(format!("/messages/get-feedback/{reply_id}"))
            .body(Body::empty())
            .expect("request build"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let feedback = body_json(response).await;
    assert_eq!(feedback["rating"], 5);
    assert_eq!(feedback["comment"], "nice");

    let response = send(&app, authorized("GET", "/users/sessions", &token, None)).await;
    assert_eq!(body_json(response).await, json!([session_id]));
}

#[tokio::test]
async fn save_response_rejects_non_assistant_sender() {
    let app = test_app();
    let user = register(&app, "ada", "ada@example.com").await;
    let response = send(
        &app,
        json_request("POST", "/sessions", json!({ "user_id": user["id"] })),
    )
    .await;
    let session_id = body_json(response).await["id"].clone();

    let response = send(
        &app,
        json_request(
            "POST",
            "/messages/save-response",
            json!({ "session_id": session_id, "sender": "user", "content": "hi" }),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["detail"],
        "Invalid sender, must be 'assistant'"
    );
}

#[tokio::test]
async fn feedback_rating_must_be_in_range() {
    let app = test_app();

    let response = send(
        &app,
        json_request(
            "POST",
            "/messages/save-feedback",
            json!({ "message_id": 1, "rating": 6 }),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["detail"],
        "Rating must be between 1 and 5"
    );
}

#[tokio::test]
async fn missing_records_are_not_found() {
    let app = test_app();

    let response = send(
        &app,
        json_request("POST", "/sessions", json!({ "user_id": 42 })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["detail"], "User not found");

    let response = send(
        &app,
        json_request(
            "PUT",
            "/sessions/42",
            json!({ "session_title": "nothing here" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(
        &app,
        json_request(
            "POST",
            "/messages/save",
            json!({ "session_id": 42, "sender": "user", "content": "hi" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["detail"], "Chat session not found");

    let response = send(
        &app,
        json_request(
            "POST",
            "/messages/save-feedback",
            json!({ "message_id": 42, "rating": 3 }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(
        &app,
        Request::builder()
            .uri("/api/messages/get-feedback/42")
            .body(Body::empty())
            .expect("request build"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["detail"], "Feedback not found");
}
