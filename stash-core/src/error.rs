//! Error types for stash operations

use thiserror::Error;

/// Argument validation errors.
///
/// These are raised synchronously, before any backend I/O starts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Empty key passed to {operation}")]
    EmptyKey { operation: &'static str },

    #[error("Null value for key {key}: values must be non-null, absence is expressed by removal")]
    NullValue { key: String },
}

/// Backend (persistence) layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Backend I/O failed: {reason}")]
    Io { reason: String },

    #[error("Failed to decode stored value for {key}: {reason}")]
    Decode { key: String, reason: String },

    #[error("Failed to encode value for {key}: {reason}")]
    Encode { key: String, reason: String },

    #[error("Backend lock poisoned")]
    LockPoisoned,
}

/// Master error type for all stash errors.
#[derive(Debug, Clone, Error)]
pub enum StashError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Result type alias for stash operations.
pub type StashResult<T> = Result<T, StashError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display_empty_key() {
        let err = ValidationError::EmptyKey { operation: "put" };
        let msg = format!("{}", err);
        assert!(msg.contains("Empty key"));
        assert!(msg.contains("put"));
    }

    #[test]
    fn test_validation_error_display_null_value() {
        let err = ValidationError::NullValue {
            key: "prefs".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Null value"));
        assert!(msg.contains("prefs"));
    }

    #[test]
    fn test_backend_error_display_io() {
        let err = BackendError::Io {
            reason: "disk full".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("I/O failed"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_backend_error_display_decode() {
        let err = BackendError::Decode {
            key: "alice:prefs".to_string(),
            reason: "unexpected end of input".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("alice:prefs"));
        assert!(msg.contains("unexpected end of input"));
    }

    #[test]
    fn test_backend_error_display_encode() {
        let err = BackendError::Encode {
            key: "prefs".to_string(),
            reason: "key must be a string".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("encode"));
        assert!(msg.contains("prefs"));
    }

    #[test]
    fn test_stash_error_from_variants() {
        let validation = StashError::from(ValidationError::EmptyKey { operation: "get" });
        assert!(matches!(validation, StashError::Validation(_)));

        let backend = StashError::from(BackendError::LockPoisoned);
        assert!(matches!(backend, StashError::Backend(_)));
    }
}
