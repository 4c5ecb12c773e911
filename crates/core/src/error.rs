//! Error taxonomy shared across the pipeline crates

use thiserror::Error;

/// Chat worker errors
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed pipeline input (e.g. empty question)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Transport failure in the search backend
    #[error("Search backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The configured text field does not exist in the collection
    #[error("Schema error: missing text field '{0}'")]
    Schema(String),

    /// Embedding computation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Rerank model or transport failure
    #[error("Rerank error: {0}")]
    Rerank(String),

    /// LLM compressor model or transport failure
    #[error("Compress error: {0}")]
    Compress(String),

    /// The model returned output that could not be parsed
    #[error("Malformed model output: {0}")]
    MalformedOutput(String),

    /// Event stream publication failure
    #[error("Stream error: {0}")]
    Stream(String),

    /// Repository write failure
    #[error("Repository error: {0}")]
    Repository(String),

    /// The pipeline was cancelled or a deadline elapsed
    #[error("Cancelled")]
    Cancelled,
}

impl Error {
    /// Whether a stage failure may be replaced by the previous stage output
    /// when the caller opted into fail-open behavior.
    pub fn is_fail_openable(&self) -> bool {
        matches!(
            self,
            Error::Rerank(_) | Error::Compress(_) | Error::MalformedOutput(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
