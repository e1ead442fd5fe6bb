use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found")]
    NotFound,

    #[error("Session expired")]
    Expired,

    #[error("Session inactive for too long")]
    Inactive,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] warden_cache::CacheError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// True for the expected outcomes the request layer answers with an
    /// authentication challenge rather than an internal error.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            SessionError::NotFound | SessionError::Expired | SessionError::Inactive
        )
    }
}

impl From<validator::ValidationErrors> for SessionError {
    fn from(err: validator::ValidationErrors) -> Self {
        SessionError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_reauthentication() {
        assert!(SessionError::NotFound.requires_reauthentication());
        assert!(SessionError::Expired.requires_reauthentication());
        assert!(SessionError::Inactive.requires_reauthentication());
        assert!(!SessionError::InvalidInput("user_id".into()).requires_reauthentication());
        assert!(!SessionError::Storage("down".into()).requires_reauthentication());
    }
}
