//! Error types for jobkit.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no processor registered for job type: {0}")]
    UnknownJobType(String),

    #[error("processor failed: {0}")]
    ProcessorFailed(String),

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
