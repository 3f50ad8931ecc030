//! Error taxonomy for the access graph core.
//!
//! Mirrors the kinds described by the specification rather than inventing a
//! type per call site: validation, not-found, conflict, cache-miss, upstream
//! unavailability, and fatal errors that trip the circuit breaker.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum AccessGraphError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("cycle would be created inserting edge {from} -> {to}")]
    CycleWouldBeCreated { from: String, to: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("event {0} not present in temporal cache")]
    EventNotCached(String),

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("service unavailable: circuit breaker is open ({0})")]
    ServiceUnavailable(String),

    #[error("split protocol violation: {0}")]
    SplitProtocolViolation(String),

    #[error("hash ranges for kind {0} do not cover the full space")]
    IncompleteHashRange(String),

    #[error("fatal error: {0}")]
    Fatal(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("timeout: {0}")]
    Timeout(String),
}

impl AccessGraphError {
    /// Whether this error represents a fatal condition that should trip the
    /// circuit breaker (per spec section 7: persister append failure, split
    /// protocol violation).
    pub fn is_fatal(&self) -> bool {
        matches!(self, AccessGraphError::Fatal(_) | AccessGraphError::SplitProtocolViolation(_))
    }
}

pub type Result<T> = std::result::Result<T, AccessGraphError>;

impl From<serde_json::Error> for AccessGraphError {
    fn from(e: serde_json::Error) -> Self {
        AccessGraphError::Serialization(e.to_string())
    }
}

impl From<uuid::Error> for AccessGraphError {
    fn from(e: uuid::Error) -> Self {
        AccessGraphError::Validation(format!("invalid uuid: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(AccessGraphError::Fatal("persister down".into()).is_fatal());
        assert!(AccessGraphError::SplitProtocolViolation("bad cutover".into()).is_fatal());
        assert!(!AccessGraphError::NotFound("x".into()).is_fatal());
    }
}
