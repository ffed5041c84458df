use std::path::PathBuf;

use thiserror::Error;

/// All errors produced by clipseek-core.
///
/// Degenerate inputs (signals shorter than a chunk or a sample) and numeric
/// edge cases (near-zero energy) are not errors: the planner yields no chunks
/// and the epsilon guards absorb the division.
#[derive(Debug, Error)]
pub enum ClipseekError {
    #[error("failed to decode {path}: {detail}")]
    Decode { path: PathBuf, detail: String },

    #[error("decoded signal is empty: {path}")]
    EmptySignal { path: PathBuf },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to extract clip {path}: {detail}")]
    Extract { path: PathBuf, detail: String },

    #[error("resampler error: {0}")]
    Resample(String),

    #[error("compute device error: {0}")]
    Device(String),

    #[error("sample database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ClipseekError>;
