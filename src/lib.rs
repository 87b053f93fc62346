//! SEMDEX - Exact Semantic Similarity Search
//!
//! Builds flat inner-product indices over unit-normalized embeddings, one
//! per category, persists them across restarts, and answers top-k queries
//! with per-entity deduplication.

pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod metrics;
pub mod persistence;
pub mod source;
pub mod vector;

pub use config::{CachePolicy, EngineConfig};
pub use engine::{
    select_category, BuildOutcome, CategorySelector, DigitRunSelector, IndexService, SearchEngine,
    SearchResult,
};
pub use error::{IndexError, Result};
pub use index::{Category, EmbeddingRecord, FlatIndex, IndexBuilder, SourceDocument};
pub use metrics::Metrics;
pub use persistence::IndexCache;
pub use source::{EmbeddingSource, JsonlSource, MemorySource};
pub use vector::{normalize, Normalized};
