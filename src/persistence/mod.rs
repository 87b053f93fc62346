//! Persistence Module
//!
//! Versioned, integrity-checked index snapshots keyed by category.

mod cache;

pub use cache::IndexCache;
