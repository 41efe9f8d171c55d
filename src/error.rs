//! Error types for store operations

use crate::core::NodeId;
use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Main error type for store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// A node id that the node table never handed out
    #[error("Node id not found: {0}")]
    NotFound(NodeId),

    /// Arity mismatch, or indexes that disagree outside a bulk load
    #[error("Inconsistent store: {0}")]
    Inconsistent(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Stored bytes that do not decode
    #[error("Codec error: {0}")]
    Codec(String),

    /// Unsupported operation, such as writing to the union graph
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The store has been closed
    #[error("Store is closed")]
    Closed,
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Config(err.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Codec(err.to_string())
    }
}

impl From<regex::Error> for StoreError {
    fn from(err: regex::Error) -> Self {
        StoreError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::Config("unknown reorder strategy: fancy".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: unknown reorder strategy: fancy"
        );

        let err = StoreError::NotFound(NodeId::new(42));
        assert_eq!(err.to_string(), "Node id not found: NodeId(42)");
    }

    #[test]
    fn test_io_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: StoreError = io.into();
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("read-only"));
    }
}
