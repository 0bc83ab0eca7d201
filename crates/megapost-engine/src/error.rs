use thiserror::Error;

/// Failures of a single category generation or a source ingestion step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("API key not configured (set GEMINI_API_KEY, GOOGLE_API_KEY or API_KEY)")]
    MissingCredential,
    #[error("unsupported image type: {0}")]
    UnsupportedMediaType(String),
    #[error("no image in generation response")]
    NoImageInResponse,
    #[error("image generation failed: {0}")]
    UpstreamFailure(String),
    #[error("invalid source URL: {0}")]
    InvalidSourceUrl(String),
    #[error("failed to fetch source image: {0}")]
    FetchFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    #[error("no source image selected")]
    NoSourceImage,
    #[error("a generation run is already in progress")]
    GenerationInProgress,
}
