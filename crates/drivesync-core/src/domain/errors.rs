//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including validation failures, invalid phase transitions, and path errors.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid relative path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid content hash format (expected lowercase hex digest)
    #[error("Invalid hash format: {0}")]
    InvalidHash(String),

    /// Invalid remote ID format
    #[error("Invalid remote ID: {0}")]
    InvalidRemoteId(String),

    /// Invalid revision marker
    #[error("Invalid revision marker: {0}")]
    InvalidRevision(String),

    /// Invalid sync root name
    #[error("Invalid sync root name: {0}")]
    InvalidRootName(String),

    /// Invalid state transition attempt
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState {
        /// The current state
        from: String,
        /// The attempted target state
        to: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::InvalidPath("../escape".to_string());
        assert_eq!(err.to_string(), "Invalid path: ../escape");

        let err = DomainError::InvalidState {
            from: "Idle".to_string(),
            to: "Executing".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid state transition from Idle to Executing"
        );
    }

    #[test]
    fn test_error_equality() {
        let err1 = DomainError::InvalidHash("xyz".to_string());
        let err2 = DomainError::InvalidHash("xyz".to_string());
        let err3 = DomainError::InvalidHash("abc".to_string());

        assert_eq!(err1, err2);
        assert_ne!(err1, err3);
    }
}
