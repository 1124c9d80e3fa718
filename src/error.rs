//! Error types for model loading and the per-image prediction pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading the model artifact. None of these are fatal
/// to startup: the service degrades to health/classes-only when the model
/// cannot be loaded.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model file not found at {0:?}")]
    NotFound(PathBuf),

    #[error("unreadable checkpoint: {0}")]
    Checkpoint(String),

    #[error("failed to build classifier: {0}")]
    Build(#[from] candle_core::Error),
}

/// Per-image pipeline errors. These are recovered as inline placeholder
/// results and never abort a batch.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to load image {path:?}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("inference failed: {0}")]
    Inference(#[from] candle_core::Error),
}

/// Errors surfaced by [`crate::predictor::Predictor::predict_path`].
///
/// `Pipeline` stays inside the per-image boundary; `Internal` means the
/// boundary itself broke and the request should fail as a whole.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("inference task failed: {0}")]
    Internal(#[from] tokio::task::JoinError),
}
