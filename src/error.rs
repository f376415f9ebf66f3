//! Error handling for guardcam

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
///
/// None of these ever cross a worker loop boundary: stages log them and move
/// on to the next message or tick.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Directory (backend) service rejected or failed a call
    #[error("Directory error: {0}")]
    Directory(String),

    /// Recorder (NVR) control failure
    #[error("Recorder error: {0}")]
    Recorder(String),

    /// Object storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Detection model failure
    #[error("Detection error: {0}")]
    Detection(String),

    /// Image decode/crop/encode failure
    #[error("Image error: {0}")]
    Image(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Error::Image(e.to_string())
    }
}
