use thiserror::Error;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A transport-level HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] sonic_rs::Error),

    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The identity backend rejected the credentials.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The backend answered 401 for the current session.
    #[error("Unauthorized")]
    Unauthorized,

    /// A resource not found error.
    #[error("Resource not found")]
    NotFound,

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The backend answered with an unexpected status.
    #[error("Unexpected status {status}: {message}")]
    Status { status: u16, message: String },

    /// The event stream failed at the transport level.
    #[error("Stream error: {0}")]
    Stream(String),

    /// A stream message could not be parsed as a sensor update.
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// An internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Logs the error at the level it warrants and returns the message
    /// shown to the user.
    pub fn report(&self) -> String {
        match self {
            AppError::Http(e) => {
                tracing::error!("HTTP error: {}", e);
                "Network error, please try again".to_string()
            }

            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                "Unexpected response from server".to_string()
            }

            AppError::Redis(e) => {
                tracing::error!("Redis error: {}", e);
                "Session storage unavailable".to_string()
            }

            AppError::Authentication(msg) => {
                tracing::warn!("Authentication failed: {}", msg);
                "Invalid credentials".to_string()
            }

            AppError::Unauthorized => {
                tracing::warn!("Session rejected by server");
                "Your session has expired, please sign in again".to_string()
            }

            AppError::NotFound => {
                tracing::debug!("Resource not found");
                "Resource not found".to_string()
            }

            AppError::Validation(msg) => {
                tracing::debug!("Validation error: {}", msg);
                msg.clone()
            }

            AppError::Status { status, message } => {
                tracing::warn!("Unexpected status {}: {}", status, message);
                format!("Request failed with status {}", status)
            }

            AppError::Stream(msg) => {
                tracing::warn!("Stream error: {}", msg);
                "Live updates unavailable".to_string()
            }

            AppError::MalformedEvent(msg) => {
                tracing::warn!("Malformed event: {}", msg);
                "Received an unreadable live update".to_string()
            }

            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal error".to_string()
            }
        }
    }
}
