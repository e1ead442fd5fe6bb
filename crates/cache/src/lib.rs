pub mod error;
pub mod redis_cache;

pub use error::{CacheError, Result};
pub use redis_cache::{trusted_devices_key, Cache, CacheConfig};
