use serde::Serialize;
use thiserror::Error;

/// Terminal failure of one logical fetch call.
///
/// Every variant maps to exactly one `ErrorKind`. Only `RateLimited`,
/// `ServerError` and `Network` are retried by the client.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Authentication expired: {message}")]
    AuthExpired { message: String },

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Rate limited: {message}")]
    RateLimited { message: String },

    #[error("Server error (status {status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("HTTP error (status {status}): {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Response decode error: {0}")]
    Decode(String),

    #[error("Session storage error: {0}")]
    Storage(#[from] AuthStoreError),
}

/// Discriminant of `FetchError`, cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Timeout,
    Cancelled,
    AuthExpired,
    Forbidden,
    NotFound,
    RateLimited,
    ServerError,
    HttpError,
    NetworkError,
    InvalidRequest,
    Decode,
    StorageError,
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Timeout { .. } => ErrorKind::Timeout,
            FetchError::Cancelled => ErrorKind::Cancelled,
            FetchError::AuthExpired { .. } => ErrorKind::AuthExpired,
            FetchError::Forbidden { .. } => ErrorKind::Forbidden,
            FetchError::NotFound { .. } => ErrorKind::NotFound,
            FetchError::RateLimited { .. } => ErrorKind::RateLimited,
            FetchError::ServerError { .. } => ErrorKind::ServerError,
            FetchError::Http { .. } => ErrorKind::HttpError,
            FetchError::Network(_) => ErrorKind::NetworkError,
            FetchError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            FetchError::Decode(_) => ErrorKind::Decode,
            FetchError::Storage(_) => ErrorKind::StorageError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Short human-readable text suitable for a notification.
    pub fn user_message(&self) -> String {
        match self {
            FetchError::Timeout { .. } => {
                "The server took too long to respond. Please try again.".to_string()
            }
            FetchError::Cancelled => "The request was cancelled.".to_string(),
            FetchError::AuthExpired { .. } => {
                "Your session has expired. Please log in again.".to_string()
            }
            FetchError::Forbidden { .. } => {
                "You do not have permission to perform this action.".to_string()
            }
            FetchError::NotFound { .. } => "The requested resource was not found.".to_string(),
            FetchError::RateLimited { .. } => {
                "Too many requests. Please wait a moment and try again.".to_string()
            }
            FetchError::ServerError { .. } => {
                "The server encountered an error. Please try again later.".to_string()
            }
            FetchError::Http { message, .. } => format!("Request failed: {message}"),
            FetchError::Network(_) => {
                "Unable to reach the server. Check your connection.".to_string()
            }
            FetchError::InvalidRequest(msg) => format!("Invalid request: {msg}"),
            FetchError::Decode(_) => "The server sent a response that could not be read.".to_string(),
            FetchError::Storage(_) => "Your session could not be saved on this device.".to_string(),
        }
    }
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::ServerError | ErrorKind::NetworkError
        )
    }
}

/// Failure reported by a transport before any response arrived.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request never left or never came back: DNS, connect, reset.
    #[error("{0}")]
    Connection(String),

    /// The request could not be built from the caller's input (bad header,
    /// URL or MIME type). Sending it again cannot succeed.
    #[error("{0}")]
    Rejected(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            TransportError::Rejected(e.to_string())
        } else {
            TransportError::Connection(e.to_string())
        }
    }
}

impl From<TransportError> for FetchError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Connection(msg) => FetchError::Network(msg),
            TransportError::Rejected(msg) => FetchError::InvalidRequest(msg),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthStoreError {
    #[error("Auth store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Auth store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}
