//! Crate-wide error type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ZeptoError>;

#[derive(Debug, Error)]
pub enum ZeptoError {
    #[error("config error: {0}")]
    Config(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
