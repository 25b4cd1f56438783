use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Message surfaced when the backend could not be reached at all, as opposed
/// to the backend answering with a rejection.
pub const UNREACHABLE_MESSAGE: &str =
    "Network error - please disable browser extensions and try again";

// --- Backend Client Errors ---

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The request never produced a response (blocked, offline, DNS, TLS, timeout).
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The backend answered and refused the request (RLS denial, constraint violation, bad credentials).
    #[error("{message}")]
    Rejected {
        message: String,
        code: Option<String>,
    },

    #[error("Could not decode backend response: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn rejected(message: impl Into<String>, code: impl Into<String>) -> Self {
        BackendError::Rejected {
            message: message.into(),
            code: Some(code.into()),
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, BackendError::Transport(_))
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Decode(err.to_string())
    }
}

// --- Store Errors ---

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No session is active; raised before any network call.
    #[error("Authentication required")]
    AuthRequired,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

// --- Session Store Errors ---

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("{}", UNREACHABLE_MESSAGE)]
    Unreachable,

    #[error("{message}")]
    Rejected {
        message: String,
        code: Option<String>,
    },

    #[error("Unexpected auth response: {0}")]
    Unexpected(String),
}

impl From<BackendError> for AuthError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Transport(_) => AuthError::Unreachable,
            BackendError::Rejected { message, code } => AuthError::Rejected { message, code },
            BackendError::Decode(msg) => AuthError::Unexpected(msg),
        }
    }
}

// --- Gateway Layer Error ---

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Sign in required")]
    AuthRequired,
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Backend unreachable")]
    BackendUnreachable(#[source] BackendError),
    #[error("Backend rejected the request: {0}")]
    BackendRejected(#[source] BackendError),

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    // Configuration / Startup errors
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Initialization error: {0}")]
    InitError(String),

    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AuthRequired => AppError::AuthRequired,
            StoreError::InvalidInput(msg) => AppError::InvalidInput(msg),
            StoreError::Backend(e @ BackendError::Transport(_)) => AppError::BackendUnreachable(e),
            StoreError::Backend(e) => AppError::BackendRejected(e),
        }
    }
}

impl From<crate::config::ConfigError> for AppError {
    fn from(err: crate::config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            // 4xx Client Errors
            AppError::AuthRequired => (StatusCode::UNAUTHORIZED, "Please sign in first".to_string()),
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::BackendRejected(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
            AppError::Auth(AuthError::Rejected { message, .. }) => (StatusCode::UNAUTHORIZED, message.clone()),

            // 5xx Server Errors
            AppError::BackendUnreachable(e) => {
                tracing::error!(error.source = ?e, "Backend could not be reached");
                (StatusCode::BAD_GATEWAY, UNREACHABLE_MESSAGE.to_string())
            }
            AppError::Auth(AuthError::Unreachable) => {
                (StatusCode::SERVICE_UNAVAILABLE, UNREACHABLE_MESSAGE.to_string())
            }
            AppError::Auth(AuthError::Unexpected(msg)) => {
                tracing::error!("Unexpected auth response: {}", msg);
                (StatusCode::BAD_GATEWAY, "Unexpected response from auth service".to_string())
            }
            AppError::ConfigError(msg) => {
                tracing::error!("Configuration error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Server configuration error".to_string())
            }
            AppError::InitError(msg) => {
                tracing::error!("Initialization error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Server initialization error".to_string())
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal server error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "An internal server error occurred".to_string())
            }
        };

        tracing::debug!(error.message = %error_message, error.detail = %self, "Responding with error");

        let body = Json(serde_json::json!({ "error": error_message }));
        (status, body).into_response()
    }
}
