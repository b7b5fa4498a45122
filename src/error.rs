//! Error taxonomy for the search-context pipeline.
//!
//! Every variant except [`PipelineError::Catastrophic`] is recoverable: the
//! router and formatter contain it at the smallest scope they can (one
//! keyword, one link, one entry) and carry on with the rest of the batch.

/// Errors produced while searching, scraping, and formatting results.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The search provider or a content host could not be reached.
    #[error("transport failure: {0}")]
    Transport(String),

    /// A fetched page did not report `text/html`.
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// A fetched page could not be turned into text.
    #[error("processing failure: {0}")]
    Processing(String),

    /// The search provider returned a body that is not valid JSON.
    #[error("decode failure for {keyword:?}: {source}")]
    Decode {
        keyword: String,
        #[source]
        source: serde_json::Error,
    },

    /// A payload or entry did not have the expected shape.
    #[error("unexpected payload shape: {0}")]
    Structural(String),

    /// The raw-results artifact could not be written or read.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Anything that escapes per-item containment.
    #[error("formatting failed: {0}")]
    Catastrophic(String),

    /// Invalid pipeline configuration.
    #[error("config error: {0}")]
    Config(String),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;
