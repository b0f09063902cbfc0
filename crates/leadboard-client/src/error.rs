//! Error types for the Leadboard client.

use thiserror::Error;

/// Errors returned by the Leadboard client.
///
/// Variants carry messages rather than source errors so results can be shared
/// between deduplicated requests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The request never produced a response (DNS, connect, TLS, body read).
    #[error("network error: {0}")]
    Transport(String),

    /// The request exceeded its timeout.
    #[error("request timed out")]
    Timeout,

    /// 401 that survived the refresh-and-retry step.
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// The session could not be recovered and has been cleared.
    #[error("session expired: {message}")]
    SessionExpired { message: String },

    /// 403 that is a permission denial rather than an invalid session.
    #[error("forbidden: {message}")]
    Forbidden { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    /// Any other non-success response, with the backend's message.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("session storage error: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    MissingCredential(String),
}

/// Coarse classification used by views to decide how to present a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    RecoverableSession,
    PermanentAuthorization,
    Validation,
    Transport,
    NotFound,
    Local,
}

impl ClientError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Unauthorized { .. } | Self::SessionExpired { .. } => {
                ErrorClass::RecoverableSession
            }
            Self::Forbidden { .. } => ErrorClass::PermanentAuthorization,
            Self::Api { .. } | Self::Decode(_) => ErrorClass::Validation,
            Self::Transport(_) | Self::Timeout => ErrorClass::Transport,
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::Storage(_) | Self::Config(_) | Self::MissingCredential(_) => ErrorClass::Local,
        }
    }

    /// Message suitable for display next to a form or list.
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport(_) | Self::Timeout => {
                "Unable to reach the server. Check your connection and try again.".to_string()
            }
            Self::Unauthorized { message }
            | Self::SessionExpired { message }
            | Self::Forbidden { message }
            | Self::NotFound { message }
            | Self::Api { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { .. } => Some(401),
            Self::Forbidden { .. } => Some(403),
            Self::NotFound { .. } => Some(404),
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result type for Leadboard operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_follow_taxonomy() {
        assert_eq!(
            ClientError::Forbidden {
                message: "Admin access required".into()
            }
            .class(),
            ErrorClass::PermanentAuthorization
        );
        assert_eq!(
            ClientError::Api {
                status: 409,
                message: "Email already exists".into()
            }
            .class(),
            ErrorClass::Validation
        );
        assert_eq!(ClientError::Timeout.class(), ErrorClass::Transport);
        assert_eq!(
            ClientError::NotFound {
                message: "Lead not found".into()
            }
            .class(),
            ErrorClass::NotFound
        );
    }

    #[test]
    fn transport_errors_get_generic_message() {
        let err = ClientError::Transport("connection refused".into());
        assert!(err.user_message().starts_with("Unable to reach the server"));

        let api = ClientError::Api {
            status: 422,
            message: "page_size must be <= 100".into(),
        };
        assert_eq!(api.user_message(), "page_size must be <= 100");
        assert_eq!(api.status(), Some(422));
    }
}
