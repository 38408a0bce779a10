use perfnoise_core::{BoundaryError, SignatureId};
use perfnoise_source::SourceError;
use perfnoise_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("segmentation for signature {id} is invalid: {source}")]
    InvalidSegmentation {
        id: SignatureId,
        #[source]
        source: BoundaryError,
    },
    #[error("tools.{0} is not configured")]
    ToolNotConfigured(&'static str),
    #[error("failed to launch {tool}: {source}")]
    ToolLaunch {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },
    #[error("{tool} produced unreadable output: {source}")]
    ToolOutput {
        tool: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
