//! Index Module
//!
//! Embedding records, the flat exact-search index and its builder.

mod builder;
mod flat;
mod record;

pub use builder::{BuildStats, IndexBuilder};
pub use flat::{FlatIndex, Neighbor};
pub use record::{Category, EmbeddingRecord, SourceDocument};
