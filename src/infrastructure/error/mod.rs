use thiserror::Error;

/// Errors raised by the session token provider.
///
/// `Clone` because a single in-flight refresh result is shared by every
/// caller awaiting it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Token refresh failed: {0}")]
    Refresh(String),

    #[error("Login failed: {0}")]
    Login(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

/// Errors raised while decoding or encoding STOMP frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StompError {
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),
}

/// Errors raised by the realtime connection manager and its transport.
#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("Not connected")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Retry limit reached after {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    #[error("Connection manager stopped")]
    ManagerStopped,

    #[error("No subscription configured for {0}")]
    UnknownTopic(String),

    #[error(transparent)]
    Stomp(#[from] StompError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the REST client.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP error! status: {status}")]
    Http { status: u16, body: String },

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// HTTP status code for non-2xx responses
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Top-level error for the client crate
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Realtime(#[from] RealtimeError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_status() {
        let err = ApiError::Http {
            status: 404,
            body: "missing".to_string(),
        };
        assert_eq!(err.status(), Some(404));
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "HTTP error! status: 404");
    }

    #[test]
    fn test_auth_error_converts_to_client_error() {
        let err: ClientError = AuthError::NotAuthenticated.into();
        assert!(matches!(err, ClientError::Auth(AuthError::NotAuthenticated)));
    }

    #[test]
    fn test_retry_exhausted_message() {
        let err = RealtimeError::RetryExhausted { attempts: 5 };
        assert_eq!(err.to_string(), "Retry limit reached after 5 attempts");
    }
}
