use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::routes::LoginRedirect;

/// Fallback when the server gives no usable error message
pub const GENERIC_FAILURE_MESSAGE: &str = "Request failed";

#[derive(Error, Debug, Clone)]
pub enum ApiError {
    /// 401 from the server. Resolved inside the gateway and only seen by
    /// callers of the raw transport.
    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    /// No response was received at all.
    #[error("Server unreachable: {0}")]
    Unreachable(String),

    #[error("Server error ({status}): {message}")]
    ServerError { status: StatusCode, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The session ended and the user has to sign in again.
    #[error("Login required")]
    LoginRequired(LoginRedirect),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Error body shape used by the backend: `{"error": "...", "details": "..."}`
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    details: Option<String>,
    message: Option<String>,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Extract the server-provided message from an error body.
    pub fn server_message(body: &str) -> String {
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => match (parsed.error.or(parsed.message), parsed.details) {
                (Some(error), Some(details)) if !details.is_empty() => format!("{}: {}", error, details),
                (Some(error), _) if !error.is_empty() => error,
                _ => GENERIC_FAILURE_MESSAGE.to_string(),
            },
            Err(_) if body.trim().is_empty() => GENERIC_FAILURE_MESSAGE.to_string(),
            Err(_) => Self::truncate_body(body.trim()),
        }
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            _ => ApiError::ServerError {
                status,
                message: Self::server_message(body),
            },
        }
    }

    /// Classify a failure to get any response. Requests that could not be
    /// built never reached the network.
    pub fn from_transport(error: &reqwest::Error) -> Self {
        if error.is_builder() {
            ApiError::InvalidRequest(error.to_string())
        } else {
            ApiError::Unreachable(error.to_string())
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Unauthorized => Some(StatusCode::UNAUTHORIZED),
            ApiError::ServerError { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_login_required(&self) -> bool {
        matches!(self, ApiError::LoginRequired(_))
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
