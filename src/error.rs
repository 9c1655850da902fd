/// Error types for the Vhisper core
///
/// Uses thiserror for ergonomic error handling with proper Display implementations.
use thiserror::Error;

/// Main error type for the core engine
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid handle")]
    InvalidHandle,

    #[error("Operation rejected: pipeline is busy")]
    Busy,

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("Audio device not available")]
    DeviceUnavailable,

    #[error("Unsupported audio format: {0}")]
    FormatUnsupported(String),

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Recognizer protocol error: {0}")]
    ProtocolError(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Enhancer failed: {0}")]
    EnhancerFailure(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, CoreError>;

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        CoreError::NetworkError(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::ConfigInvalid(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for CoreError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        CoreError::NetworkError(err.to_string())
    }
}

/// Convert a CoreError to a string, for crossing the FFI boundary
impl From<CoreError> for String {
    fn from(error: CoreError) -> Self {
        error.to_string()
    }
}
