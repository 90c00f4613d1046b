use thiserror::Error;

/// Error taxonomy for the inspection engine.
#[derive(Debug, Error)]
pub enum InspectionError {
    /// Empty or unreadable input image. No partial work is done.
    #[error("Input error: {0}")]
    Input(String),

    /// A pipeline stage produced an invalid image; the whole inspection aborts.
    #[error("Filter '{stage}' failed: {reason}")]
    Stage { stage: String, reason: String },

    /// A single detector failed; the controller isolates this and continues.
    #[error("Detector '{detector}' failed: {reason}")]
    Detector { detector: String, reason: String },

    /// A malformed parameter value. The previous value is kept.
    #[error("Invalid value for '{key}': {reason}")]
    Config { key: String, reason: String },

    #[error("Unknown {category} type: {kind}")]
    UnknownKind { category: &'static str, kind: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, InspectionError>;
