use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur when interacting with a code platform.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Non-success response that doesn't fit a more specific variant.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Primary rate limit exhausted.
    #[error("Rate limit exceeded. Resets at {reset_at}")]
    RateLimited { reset_at: DateTime<Utc> },

    /// Authentication missing, failed, or not sufficient for the resource.
    #[error("Authentication required: {message}")]
    AuthRequired { message: String },

    /// Resource not found, or hidden from the token.
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    /// Token rejected before any request was made.
    #[error("Invalid token: {reason}")]
    InvalidToken { reason: String },

    /// Network or connection error.
    #[error("Network error: {message}")]
    Network { message: String },

    /// Response body could not be decoded.
    #[error("Failed to decode response from {resource}: {message}")]
    Decode { resource: String, message: String },

    /// Unexpected/internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PlatformError {
    #[inline]
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    #[inline]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    #[inline]
    pub fn auth_required(message: impl Into<String>) -> Self {
        Self::AuthRequired {
            message: message.into(),
        }
    }

    #[inline]
    pub fn invalid_token(reason: impl Into<String>) -> Self {
        Self::InvalidToken {
            reason: reason.into(),
        }
    }

    #[inline]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    #[inline]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Map a non-success status to the matching variant.
    ///
    /// 401/403 mean the token can't see the resource, 404 means it either
    /// doesn't exist or is hidden; GitHub uses 404 for both.
    pub fn from_status(status: u16, resource: &str, message: String) -> Self {
        match status {
            401 | 403 => Self::AuthRequired { message },
            404 => Self::NotFound {
                resource: resource.to_string(),
            },
            _ => Self::Api { status, message },
        }
    }

    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this error likely reflects a missing capability rather than
    /// an operational failure.
    #[inline]
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::AuthRequired { .. })
    }

    #[inline]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Extract a short error message suitable for display.
///
/// Takes the first line of an error message, which keeps log lines readable
/// when a provider returns a multi-line body.
#[inline]
pub fn short_error_message(e: &impl std::error::Error) -> String {
    let full = e.to_string();
    full.lines().next().unwrap_or(&full).to_string()
}

/// Result type for platform operations.
pub type Result<T> = std::result::Result<T, PlatformError>;
