//! Flat Index
//!
//! Brute-force inner-product index over unit vectors. Immutable once built;
//! a rebuild produces a new `FlatIndex` that replaces the old one wholesale.

use chrono::{DateTime, Utc};
use std::time::Duration;

use super::record::Category;
use crate::error::{IndexError, Result};
use crate::vector::dot_product;

/// A scored row from a nearest-neighbor scan
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Row position in the index
    pub row: usize,
    /// Inner product with the query
    pub score: f32,
}

/// Exact-search index for one category.
///
/// Row `i` of the vector matrix belongs to `ids[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    category: Category,
    dimension: usize,
    /// Row-major `len() x dimension` matrix
    vectors: Vec<f32>,
    ids: Vec<String>,
    built_at: DateTime<Utc>,
}

impl FlatIndex {
    /// Assemble an index from its parts, checking the vectors/ids pairing.
    pub fn from_parts(
        category: Category,
        dimension: usize,
        vectors: Vec<f32>,
        ids: Vec<String>,
        built_at: DateTime<Utc>,
    ) -> Result<Self> {
        if dimension == 0 {
            return Err(IndexError::InvalidFormat("dimension must be non-zero".into()));
        }
        if vectors.len() != ids.len() * dimension {
            return Err(IndexError::InvalidFormat(format!(
                "{} ids but {} floats for dimension {}",
                ids.len(),
                vectors.len(),
                dimension
            )));
        }
        Ok(Self {
            category,
            dimension,
            vectors,
            ids,
            built_at,
        })
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Number of stored vectors (not distinct entities)
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Flat vector matrix in row order
    pub fn raw_vectors(&self) -> &[f32] {
        &self.vectors
    }

    pub fn row(&self, row: usize) -> &[f32] {
        let start = row * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    pub fn id(&self, row: usize) -> &str {
        &self.ids[row]
    }

    /// Number of distinct entity ids
    pub fn entity_count(&self) -> usize {
        self.ids
            .iter()
            .map(String::as_str)
            .collect::<hashbrown::HashSet<_>>()
            .len()
    }

    /// Whether the index is older than `window` at `now`.
    ///
    /// A `built_at` in the future (clock skew) never counts as stale.
    pub fn is_stale(&self, window: Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.built_at)
            .to_std()
            .map(|age| age > window)
            .unwrap_or(false)
    }

    /// Scan every row and return the `n` best by inner product.
    ///
    /// Ties keep row order.
    pub fn knn(&self, query: &[f32], n: usize) -> Vec<Neighbor> {
        debug_assert_eq!(query.len(), self.dimension);

        let mut scored: Vec<Neighbor> = self
            .vectors
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(row, v)| Neighbor {
                row,
                score: dot_product(query, v),
            })
            .collect();

        // Stable sort, so equal scores stay in row order
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(n);
        scored
    }
}
