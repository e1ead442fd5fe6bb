use thiserror::Error;

pub type Result<T> = std::result::Result<T, CacheError>;

/// Failures talking to the Redis-backed cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    ConnectionError(#[from] redis::RedisError),

    #[error("Cached value could not be (de)serialized: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Rejected before any connection was attempted.
    #[error("Invalid cache configuration: {0}")]
    Config(String),
}
