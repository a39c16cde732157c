use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnsembleError {
    /// Inputs that cannot describe a valid model: shape mismatches,
    /// malformed family trees, leaves that differ from the base models
    #[error("configuration error: {0}")]
    Config(String),
    /// Covariances that stay indefinite after the ridge, non-finite losses
    #[error("numerical error: {0}")]
    Numerical(String),
    /// Draws or parameters whose keys do not line up with the tree
    #[error("consistency error: {0}")]
    Consistency(String),
    #[error(transparent)]
    Candle(#[from] candle_util::candle_core::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Failures reported by the matrix and sampler utility crates
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EnsembleError>;

impl EnsembleError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn numerical(msg: impl Into<String>) -> Self {
        Self::Numerical(msg.into())
    }

    pub fn consistency(msg: impl Into<String>) -> Self {
        Self::Consistency(msg.into())
    }
}
