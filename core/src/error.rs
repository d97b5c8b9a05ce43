/// Error types for the Friday workspace client
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FridayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Normalized backend failure: HTTP status plus the backend's `detail`/`msg`.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Transport-level failure before any HTTP status was received.
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Timeout error: {0}")]
    Timeout(String),
}

impl FridayError {
    /// `{status, message}` shape surfaced to the user.
    /// Transport failures report status 0.
    pub fn status_and_message(&self) -> (u16, String) {
        match self {
            FridayError::Api { status, message } => (*status, message.clone()),
            FridayError::NotAuthenticated => (401, self.to_string()),
            other => (0, other.to_string()),
        }
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            FridayError::NotAuthenticated | FridayError::Api { status: 401, .. }
        )
    }
}

impl From<reqwest::Error> for FridayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return FridayError::Timeout(e.to_string());
        }
        match e.status() {
            Some(status) => FridayError::Api {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string(),
            },
            None => FridayError::Http(e.to_string()),
        }
    }
}

impl From<sled::Error> for FridayError {
    fn from(e: sled::Error) -> Self {
        FridayError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FridayError>;
