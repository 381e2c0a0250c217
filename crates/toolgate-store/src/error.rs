//! Error types for the store crate

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Bus unavailable: {0}")]
    BusUnavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
