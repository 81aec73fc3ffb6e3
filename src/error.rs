//! Pipeline error taxonomy.
//!
//! Transient errors (`SourceUnavailable`, `InferenceFailure`) are handled
//! inside the pipeline by retry/skip and reported to the observability sink;
//! they never surface through the snapshot or frame stream. `InvalidConfig`
//! is returned synchronously to the caller of `reconfigure`. `PipelineFatal`
//! stops the run loop and is surfaced via `PipelineHandle::fault`.

use thiserror::Error;

/// Errors produced by frame source adapters.
///
/// Adapter internals use `anyhow` and wrap into this at the trait boundary.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The underlying device/stream is lost or stalled past the stall
    /// timeout. Transient; the supervisor reopens with backoff.
    #[error("frame source unavailable: {0}")]
    Unavailable(String),
}

/// Top-level pipeline error taxonomy.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Input device/stream lost (transient, retried with backoff).
    #[error("frame source unavailable: {0}")]
    SourceUnavailable(String),

    /// Single-frame model error (transient, frame skipped).
    #[error("inference failure: {0}")]
    InferenceFailure(String),

    /// Caller error, rejected synchronously by `reconfigure`.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Unrecoverable: inference failure ratio exceeded, or an operator-defined
    /// giving-up point was reached. Stops the run loop.
    #[error("pipeline fatal: {0}")]
    PipelineFatal(String),

    /// The pipeline has already stopped; the operation cannot be applied.
    #[error("pipeline stopped")]
    Stopped,
}

impl From<SourceError> for PipelineError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Unavailable(reason) => PipelineError::SourceUnavailable(reason),
        }
    }
}
