//! Closed error vocabulary for the analysis core.

use thiserror::Error;

/// Every failure mode a caller of this crate can observe.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid position: {0}")]
    InvalidPosition(String),

    #[error("engine failed: {0}")]
    EngineFailed(String),

    #[error("engine timed out after {0:?}")]
    EngineTimeout(std::time::Duration),

    #[error("nnue evaluator unavailable: {0}")]
    NnueUnavailable(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
