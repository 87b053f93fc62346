//! Error Types
//!
//! A single error enum for building, persisting and searching indices.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors raised by the index builder, cache and search engine.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid cache format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported cache version: expected {expected}, found {actual}")]
    VersionMismatch { expected: u8, actual: u8 },

    #[error("Dimension mismatch for '{entity_id}': expected {expected}, got {actual}")]
    DimensionMismatch {
        entity_id: String,
        expected: usize,
        actual: usize,
    },

    #[error("Query dimension mismatch: expected {expected}, got {actual}")]
    QueryDimension { expected: usize, actual: usize },

    #[error("Embedding source failed: {0}")]
    Source(String),

    #[error("Malformed source document at line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Build timed out after {0:?}")]
    Timeout(Duration),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl IndexError {
    /// Whether the error came from reading a damaged or incompatible cache.
    pub fn is_cache_corruption(&self) -> bool {
        matches!(
            self,
            IndexError::InvalidFormat(_) | IndexError::VersionMismatch { .. }
        )
    }
}
