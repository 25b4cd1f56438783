use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use memehub_feed::{memory::MemoryBackend, routes::create_router, startup::AppState};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

async fn app() -> Router {
    let backend = Arc::new(MemoryBackend::new());
    let state = AppState::start(backend.clone(), backend).await;
    create_router(state)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn anonymous_visitors_can_read_but_not_write() {
    let app = app().await;

    let (status, session) = send(&app, "GET", "/session", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["user"], Value::Null);

    let (status, feed) = send(&app, "GET", "/memes", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(feed["memes"], json!([]));

    let (status, body) = send(
        &app,
        "POST",
        "/memes",
        Some(json!({ "title": "t", "image_url": "https://img.example/t.png" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = send(&app, "GET", "/profile/stats", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&app, "GET", "/profile", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn signed_in_flow_posts_votes_and_comments() {
    let app = app().await;

    let (status, session) = send(
        &app,
        "POST",
        "/auth/signup",
        Some(json!({ "email": "ann@example.com", "password": "hunter22", "username": "ann" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(session["user"]["username"], json!("ann"));

    let (status, feed) = send(
        &app,
        "POST",
        "/memes",
        Some(json!({ "title": "Monday", "image_url": "https://img.example/m.png", "tags": ["work"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let meme_id = feed["memes"][0]["id"].as_str().unwrap().to_string();

    let (status, meme) = send(&app, "POST", &format!("/memes/{}/vote", meme_id), Some(json!({ "direction": "up" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(meme["upvotes"], json!(1));
    assert_eq!(meme["user_vote"], json!("up"));

    let (status, comments) = send(
        &app,
        "POST",
        &format!("/memes/{}/comments", meme_id),
        Some(json!({ "content": "nice" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let comment_id = comments["comments"][0]["id"].as_str().unwrap().to_string();

    let (status, stats) = send(&app, "GET", "/profile/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats, json!({ "memes_posted": 1, "total_upvotes": 1, "total_comments": 1 }));

    let (status, profile) = send(&app, "GET", "/profile", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["labels"], json!({ "memes_posted": "1", "total_upvotes": "1", "total_comments": "1" }));
    assert_eq!(profile["memes"][0]["id"], json!(meme_id));

    let (status, trending) = send(&app, "GET", "/trending?window=all", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(trending.as_array().map(Vec::len), Some(1));

    let (status, _) = send(&app, "DELETE", &format!("/memes/{}/comments/{}", meme_id, comment_id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, comments) = send(&app, "GET", &format!("/memes/{}/comments", meme_id), None).await;
    assert_eq!(comments["comments"], json!([]));

    let (status, _) = send(&app, "POST", "/auth/signout", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, session) = send(&app, "GET", "/session", None).await;
    assert_eq!(session["user"], Value::Null);
}

#[tokio::test]
async fn bad_credentials_and_bad_input_are_client_errors() {
    let app = app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/auth/signin",
        Some(json!({ "email": "nobody@example.com", "password": "nope" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], json!("Invalid login credentials"));

    send(
        &app,
        "POST",
        "/auth/signup",
        Some(json!({ "email": "ann@example.com", "password": "hunter22", "username": "ann" })),
    )
    .await;
    let (status, _) = send(&app, "POST", "/memes", Some(json!({ "title": " ", "image_url": "x" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_reports_connectivity() {
    let app = app().await;
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "connected" }));
}
