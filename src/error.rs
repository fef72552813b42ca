use thiserror::Error;

/// Result type for coordination operations
pub type Result<T> = std::result::Result<T, CoordinationError>;

/// Errors that can occur in the coordination layer
#[derive(Error, Debug)]
pub enum CoordinationError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("failed to acquire lock on {key} within {tries} tries")]
    LockUnavailable { key: String, tries: u32 },

    #[error("lock {key} is no longer valid or held by a different identifier")]
    NotOwner { key: String },

    #[error("lock acquisition cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("unexpected script reply: {0}")]
    ScriptReply(String),

    #[error("Service error: {0}")]
    Service(String),
}

impl CoordinationError {
    /// True for contention outcomes: the resource was busy and the caller
    /// should back off or skip the work, not treat this as a failure.
    pub fn is_contention(&self) -> bool {
        matches!(self, CoordinationError::LockUnavailable { .. })
    }

    /// True when a release or renewal was attempted with a stale or
    /// mismatched holder identifier.
    pub fn is_ownership(&self) -> bool {
        matches!(self, CoordinationError::NotOwner { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let contended = CoordinationError::LockUnavailable {
            key: "lock:job".to_string(),
            tries: 5,
        };
        assert!(contended.is_contention());
        assert!(!contended.is_ownership());

        let stale = CoordinationError::NotOwner {
            key: "lock:job".to_string(),
        };
        assert!(stale.is_ownership());
        assert!(!stale.is_contention());

        let config = CoordinationError::Config("empty rule list".to_string());
        assert!(!config.is_contention());
        assert!(!config.is_ownership());
    }

    #[test]
    fn test_error_display() {
        let err = CoordinationError::LockUnavailable {
            key: "lock:report".to_string(),
            tries: 5,
        };
        assert_eq!(
            err.to_string(),
            "failed to acquire lock on lock:report within 5 tries"
        );
    }
}
