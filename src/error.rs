use crate::config::{ConfigError, FillError};
use thiserror::Error;

/// Top-level error type for the dragon-props library.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to fill struct: {0}")]
    Fill(#[from] FillError),
}
