//! Error types for the lattice harness.
//!
//! The index structures themselves never produce these errors: their contract
//! is booleans and value-set snapshots, and internal retries (CAS failures,
//! root changes, optimistic-insert misses) are absorbed locally. Everything
//! below is an input error raised while setting up or parsing a workload.

use thiserror::Error;

/// Result type alias using LatticeError.
pub type Result<T> = std::result::Result<T, LatticeError>;

/// Errors that can occur while driving the lattice index layer.
#[derive(Debug, Error)]
pub enum LatticeError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Argument errors
    #[error("Invalid size: {0}. Supported units: B, KB, MB")]
    InvalidSize(String),

    #[error("Unknown index kind: {0}. Supported: skip-list, inverted-index, bplus-tree")]
    UnknownIndexKind(String),

    #[error("Invalid thread count: {0}. Supported: 1, 4, 8, 16")]
    InvalidThreadCount(usize),

    // Trace errors
    #[error("Malformed trace line {line}: {text}")]
    MalformedTrace { line: usize, text: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: LatticeError = io_err.into();
        assert!(matches!(err, LatticeError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_invalid_size_display() {
        let err = LatticeError::InvalidSize("64QB".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid size: 64QB. Supported units: B, KB, MB"
        );
    }

    #[test]
    fn test_unknown_index_kind_display() {
        let err = LatticeError::UnknownIndexKind("b-tree".to_string());
        assert!(err.to_string().contains("b-tree"));
        assert!(err.to_string().contains("skip-list"));
    }

    #[test]
    fn test_malformed_trace_display() {
        let err = LatticeError::MalformedTrace {
            line: 17,
            text: "query(DROP())".to_string(),
        };
        assert_eq!(err.to_string(), "Malformed trace line 17: query(DROP())");
    }
}
