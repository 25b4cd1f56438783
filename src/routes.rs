use crate::{handlers, startup::AppState};
use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Creates the gateway router the browser front end talks to.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/memes", get(handlers::list_memes).post(handlers::create_meme))
        .route("/memes/{id}/vote", post(handlers::vote_meme))
        .route(
            "/memes/{id}/comments",
            get(handlers::list_comments).post(handlers::create_comment),
        )
        .route("/memes/{id}/comments/{comment_id}", delete(handlers::delete_comment))
        .route("/session", get(handlers::get_session))
        .route("/auth/signup", post(handlers::sign_up))
        .route("/auth/signin", post(handlers::sign_in))
        .route("/auth/signout", post(handlers::sign_out))
        .route("/profile", get(handlers::profile))
        .route("/profile/stats", get(handlers::profile_stats))
        .route("/trending", get(handlers::trending_memes))
        .route("/health", get(handlers::health))
        // Middleware Layers
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
