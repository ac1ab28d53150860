//! Engine error types
//!
//! One public error enum for the whole engine. Optional subsystems (extractor,
//! contradiction detection, individual retrieval layers) catch and downgrade
//! their own failures into warnings; the graph, indexes, and context assembler
//! propagate.

use std::path::PathBuf;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Engine error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A referenced id (node, edge, contradiction, user) does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A write was rejected because it would violate an invariant
    #[error("conflict: {0}")]
    Conflict(String),

    /// An LLM / embedding operation was vetoed by the budget manager
    #[error("budget exhausted: {0}")]
    BudgetExhausted(String),

    /// A remote LLM / embedding call exceeded its per-call timeout
    #[error("upstream timeout after {elapsed_ms}ms: {operation}")]
    UpstreamTimeout {
        /// The operation that timed out
        operation: String,
        /// How long we waited
        elapsed_ms: u64,
    },

    /// An index file failed to parse on startup
    #[error("corrupt index {path}: {reason}")]
    CorruptIndex {
        /// The file that failed to load
        path: PathBuf,
        /// Parse failure detail
        reason: String,
    },

    /// Unrecoverable environment failure (disk full, permissions)
    #[error("fatal: {0}")]
    Fatal(String),

    /// Remote provider failure that is not a timeout
    #[error("provider error: {0}")]
    Provider(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Embedded KV backend error
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl EngineError {
    /// True when the public `add` / `search` operation should continue with a
    /// warning instead of failing (spec'd degradation path).
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            EngineError::BudgetExhausted(_)
                | EngineError::UpstreamTimeout { .. }
                | EngineError::Provider(_)
        )
    }
}

impl From<redb::DatabaseError> for EngineError {
    fn from(e: redb::DatabaseError) -> Self {
        EngineError::Backend(e.to_string())
    }
}
impl From<redb::TransactionError> for EngineError {
    fn from(e: redb::TransactionError) -> Self {
        EngineError::Backend(e.to_string())
    }
}
impl From<redb::TableError> for EngineError {
    fn from(e: redb::TableError) -> Self {
        EngineError::Backend(e.to_string())
    }
}
impl From<redb::StorageError> for EngineError {
    fn from(e: redb::StorageError) -> Self {
        EngineError::Backend(e.to_string())
    }
}
impl From<redb::CommitError> for EngineError {
    fn from(e: redb::CommitError) -> Self {
        EngineError::Backend(e.to_string())
    }
}

/// Engine result type
pub type Result<T> = std::result::Result<T, EngineError>;

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degradable_kinds() {
        assert!(EngineError::BudgetExhausted("llm".into()).is_degradable());
        assert!(
            EngineError::UpstreamTimeout {
                operation: "embed".into(),
                elapsed_ms: 5000,
            }
            .is_degradable()
        );
        assert!(!EngineError::NotFound("node".into()).is_degradable());
        assert!(!EngineError::Conflict("self-loop".into()).is_degradable());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: EngineError = io.into();
        assert!(matches!(err, EngineError::Io(_)));
    }
}
