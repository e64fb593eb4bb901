//! # Error Handling
//!
//! Custom error types for the voice session bridge and how they are converted
//! to HTTP responses and client-facing messages.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Result<T, E> Type
//! - **Purpose**: Forces you to handle both success and failure cases
//! - **No exceptions**: Rust doesn't have try/catch, it uses Result instead
//! - **? operator**: Propagates errors up the call stack with automatic conversion
//!
//! ### Enums for Error Types
//! - **Variants**: Each variant is one failure category of the bridge
//! - **Data**: Each variant carries a human-readable message
//!
//! ## Error Categories:
//! The first five variants mirror the failure taxonomy of the session bridge
//! (backend connection, backend protocol, device access, frame decode,
//! transport loss). The rest are the ambient categories every handler needs.
//! Every failure is session-scoped: nothing in this module is allowed to take
//! down the hosting process.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Error type used across the bridge, the pipelines, and the HTTP surface.
///
/// ## Usage Example:
/// ```rust
/// use teacher_voice_backend::error::{AppError, AppResult};
///
/// fn open_session() -> AppResult<()> {
///     Err(AppError::BackendUnavailable("connect timed out".to_string()))
/// }
/// ```
#[derive(Debug, Clone)]
pub enum AppError {
    /// The speech backend connection could not be established
    BackendUnavailable(String),

    /// The speech backend sent something malformed or unexpected
    BackendProtocol(String),

    /// Microphone (or output device) access was refused by the platform
    DeviceAccess(String),

    /// An audio frame could not be decoded (recovered locally, counted)
    Decode(String),

    /// The channel to the peer dropped unexpectedly
    TransportClosed(String),

    /// Internal server errors that fit no other category
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Configuration file or environment variable problems
    ConfigError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BackendUnavailable(msg) => write!(f, "Backend unavailable: {}", msg),
            AppError::BackendProtocol(msg) => write!(f, "Backend protocol error: {}", msg),
            AppError::DeviceAccess(msg) => write!(f, "Device access denied: {}", msg),
            AppError::Decode(msg) => write!(f, "Audio decode error: {}", msg),
            AppError::TransportClosed(msg) => write!(f, "Transport closed: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Converts bridge errors into HTTP responses for the REST surface.
///
/// ## HTTP Status Code Mapping:
/// - BackendUnavailable/BackendProtocol → 502 (Bad Gateway)
/// - Decode/BadRequest → 400 (Bad Request)
/// - DeviceAccess/TransportClosed/Internal/ConfigError → 500
///
/// ## JSON Response Format:
/// All errors return JSON with a consistent structure:
/// ```json
/// {
///   "error": {
///     "type": "backend_unavailable",
///     "message": "connect timed out",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::BackendUnavailable(msg) => (
                actix_web::http::StatusCode::BAD_GATEWAY,
                "backend_unavailable",
                msg.clone(),
            ),
            AppError::BackendProtocol(msg) => (
                actix_web::http::StatusCode::BAD_GATEWAY,
                "backend_protocol_error",
                msg.clone(),
            ),
            AppError::DeviceAccess(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "device_access_denied",
                msg.clone(),
            ),
            AppError::Decode(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "decode_error",
                msg.clone(),
            ),
            AppError::TransportClosed(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "transport_closed",
                msg.clone(),
            ),
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
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

/// General-purpose errors collapse to Internal; use the specific variants
/// where the failure category is known.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing failures are almost always malformed client input, so they
/// map to BadRequest (400) rather than a server error.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Maps WebSocket-level failures from the backend connection.
///
/// A clean close is a transport loss, a WS protocol violation is a backend
/// protocol error, and everything else (DNS, TLS, handshake, I/O) means the
/// backend could not be reached. Call sites that know better (for example a
/// read error mid-session) construct the variant directly instead.
impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                AppError::TransportClosed("backend connection closed".to_string())
            }
            WsError::Protocol(e) => AppError::BackendProtocol(e.to_string()),
            other => AppError::BackendUnavailable(other.to_string()),
        }
    }
}

/// Context-service fetch failures. These are best-effort reads, so callers
/// normally log and fall back to an empty bundle instead of propagating.
impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Internal(format!("Context service error: {}", err))
    }
}

/// Type alias for Results that use our custom error type.
///
/// ## Usage Example:
/// ```rust
/// use teacher_voice_backend::error::{AppError, AppResult};
///
/// fn require_user(id: Option<&str>) -> AppResult<String> {
///     id.map(str::to_string)
///         .ok_or_else(|| AppError::BadRequest("Missing userId".to_string()))
/// }
/// ```
pub type AppResult<T> = Result<T, AppError>;
