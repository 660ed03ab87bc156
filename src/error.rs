//! # Error Handling
//!
//! Two error families live here:
//!
//! - **SessionError**: everything that can go wrong inside one interview
//!   session (settings, resume download, completion, speech, storage, state).
//!   These never become HTTP responses; the WebSocket layer turns them into
//!   error-shaped event payloads so the client always gets an answer.
//! - **AppError**: failures of the plain HTTP endpoints, rendered as JSON
//!   through actix-web's `ResponseError`.
//!
//! ## Wire Format:
//! `SessionError::kind()` is the stable machine-readable identifier sent to
//! clients, e.g. `{"error": {"kind": "completion_error", "message": "..."}}`.

use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Failures of a single conversational session.
///
/// ## Variants:
/// Each variant corresponds to one collaborator or one class of misuse, so
/// callers can tell a flaky completion service apart from a client that
/// asked a question before sending `init`.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Settings object failed validation
    #[error("invalid settings: {0}")]
    Settings(String),

    /// Resume could not be downloaded
    #[error("failed to fetch resume: {0}")]
    Fetch(String),

    /// Resume was downloaded but could not be parsed
    #[error("failed to extract resume text: {0}")]
    Extract(String),

    /// The completion service rejected the request or could not be reached
    #[error("completion failed{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Completion {
        /// HTTP status returned by the service, if the request got that far
        status: Option<u16>,
        message: String,
    },

    /// The speech engine did not finish synthesis successfully
    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    /// The speech engine could not recognize audio
    #[error("speech recognition failed: {0}")]
    Recognition(String),

    /// Operation is not valid in the session's current state
    #[error("invalid session state: {0}")]
    State(String),

    /// Session storage could not be read or written
    #[error("session storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// The server is already running its maximum number of sessions
    #[error("session limit reached: {0}")]
    Capacity(String),
}

impl SessionError {
    /// Stable identifier used in error-shaped event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Settings(_) => "settings_error",
            SessionError::Fetch(_) => "fetch_error",
            SessionError::Extract(_) => "extract_error",
            SessionError::Completion { .. } => "completion_error",
            SessionError::Synthesis(_) => "synthesis_error",
            SessionError::Recognition(_) => "recognition_error",
            SessionError::State(_) => "session_state_error",
            SessionError::Storage(_) => "storage_error",
            SessionError::Capacity(_) => "capacity_error",
        }
    }

    /// Convert into the payload sent to the client.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }

    pub(crate) fn completion(message: impl Into<String>) -> Self {
        SessionError::Completion {
            status: None,
            message: message.into(),
        }
    }
}

/// Error body sent over the socket instead of a normal result.
#[derive(Debug, Clone, Serialize, serde::Deserialize, PartialEq)]
pub struct ErrorPayload {
    pub kind: String,
    pub message: String,
}

/// Result alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors returned by the HTTP endpoints.
///
/// ## HTTP Status Code Mapping:
/// - BadRequest → 400
/// - NotFound → 404
/// - Internal → 500
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "not_found",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match &err {
            SessionError::State(_) => AppError::BadRequest(err.to_string()),
            _ => AppError::Internal(err.to_string()),
        }
    }
}
