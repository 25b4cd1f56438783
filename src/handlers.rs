use crate::{
    comments::{CommentState, CommentStore},
    domain::Connectivity,
    errors::AppError,
    feed::FeedState,
    models::{Meme, VoteDirection},
    session::SessionState,
    startup::AppState,
    views::{TrendingWindow, UserProfile, UserStats, trending},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Deserialize, Debug)]
pub struct CreateMemeRequest {
    pub title: String,
    pub image_url: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Deserialize, Debug)]
pub struct VoteRequest {
    pub direction: VoteDirection,
}

#[derive(Deserialize, Debug)]
pub struct CreateCommentRequest {
    pub content: String,
}

#[derive(Deserialize, Debug)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub username: String,
}

#[derive(Deserialize, Debug)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct TrendingParams {
    #[serde(default)]
    pub window: TrendingWindow,
}

/// Handler for GET /memes: reloads the feed and returns it, connection error included.
pub async fn list_memes(State(state): State<Arc<AppState>>) -> Json<FeedState> {
    state.feed.fetch_all().await;
    let feed = state.feed.snapshot();
    tracing::debug!(count = feed.memes.len(), "Returning feed");
    Json(feed)
}

pub async fn create_meme(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateMemeRequest>,
) -> Result<(StatusCode, Json<FeedState>), AppError> {
    state.feed.create(&req.title, &req.image_url, req.tags).await?;
    Ok((StatusCode::CREATED, Json(state.feed.snapshot())))
}

/// Handler for POST /memes/{id}/vote. Responds with the meme as re-read after the vote.
pub async fn vote_meme(
    State(state): State<Arc<AppState>>,
    Path(meme_id): Path<Uuid>,
    Json(req): Json<VoteRequest>,
) -> Result<Json<Option<Meme>>, AppError> {
    state.feed.vote(meme_id, req.direction).await?;
    let meme = state.feed.snapshot().memes.into_iter().find(|m| m.id == meme_id);
    Ok(Json(meme))
}

fn comment_store(state: &AppState, meme_id: Uuid) -> CommentStore {
    CommentStore::new(
        Arc::clone(&state.backend),
        state.session.context(),
        state.notices.clone(),
        meme_id,
    )
}

pub async fn list_comments(State(state): State<Arc<AppState>>, Path(meme_id): Path<Uuid>) -> Json<CommentState> {
    let store = comment_store(&state, meme_id);
    store.fetch_all().await;
    Json(store.snapshot())
}

pub async fn create_comment(
    State(state): State<Arc<AppState>>,
    Path(meme_id): Path<Uuid>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<(StatusCode, Json<CommentState>), AppError> {
    let store = comment_store(&state, meme_id);
    store.create(&req.content).await?;
    Ok((StatusCode::CREATED, Json(store.snapshot())))
}

pub async fn delete_comment(
    State(state): State<Arc<AppState>>,
    Path((meme_id, comment_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    let store = comment_store(&state, meme_id);
    store.delete(comment_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_session(State(state): State<Arc<AppState>>) -> Json<SessionState> {
    Json(state.session.context().snapshot())
}

pub async fn sign_up(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignUpRequest>,
) -> Result<(StatusCode, Json<SessionState>), AppError> {
    if req.username.trim().is_empty() {
        return Err(AppError::InvalidInput("username cannot be empty".to_string()));
    }
    state.session.sign_up(&req.email, &req.password, req.username.trim()).await?;
    Ok((StatusCode::CREATED, Json(state.session.context().snapshot())))
}

pub async fn sign_in(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignInRequest>,
) -> Result<Json<SessionState>, AppError> {
    state.session.sign_in(&req.email, &req.password).await?;
    Ok(Json(state.session.context().snapshot()))
}

pub async fn sign_out(State(state): State<Arc<AppState>>) -> Result<StatusCode, AppError> {
    state.session.sign_out().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for GET /profile/stats: totals over the signed-in user's memes.
pub async fn profile_stats(State(state): State<Arc<AppState>>) -> Result<Json<UserStats>, AppError> {
    let user = state.session.context().current_user().ok_or(AppError::AuthRequired)?;
    state.feed.fetch_all().await;
    let feed = state.feed.snapshot();
    Ok(Json(UserStats::for_user(&feed.memes, user.id)))
}

/// Handler for GET /profile: the signed-in user's memes with display-ready totals.
pub async fn profile(State(state): State<Arc<AppState>>) -> Result<Json<UserProfile>, AppError> {
    let user = state.session.context().current_user().ok_or(AppError::AuthRequired)?;
    state.feed.fetch_all().await;
    let feed = state.feed.snapshot();
    let profile = UserProfile::for_user(&feed.memes, user.id);
    tracing::debug!(user_id = %user.id, memes = profile.memes.len(), "Returning profile");
    Ok(Json(profile))
}

pub async fn trending_memes(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TrendingParams>,
) -> Json<Vec<Meme>> {
    state.feed.fetch_all().await;
    let feed = state.feed.snapshot();
    Json(trending(&feed.memes, params.window, Utc::now()))
}

pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Connectivity>) {
    let connectivity = state.backend.probe().await;
    let status = match connectivity {
        Connectivity::Connected => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(connectivity))
}
