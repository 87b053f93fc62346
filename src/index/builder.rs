//! Index Builder
//!
//! Normalizes the vectors of one category and assembles a `FlatIndex`.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::flat::FlatIndex;
use super::record::{Category, EmbeddingRecord};
use crate::error::{IndexError, Result};
use crate::vector::normalize;

/// Summary of what a build consumed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Records that contributed at least one vector
    pub records: usize,
    /// Vectors added to the index
    pub vectors: usize,
    /// Vectors left unnormalized because their norm was zero
    pub degenerate: usize,
    /// Records skipped because they belong to another category
    pub skipped: usize,
}

/// Builds flat indices for a fixed dimension
#[derive(Debug, Clone, Copy)]
pub struct IndexBuilder {
    dimension: usize,
}

impl IndexBuilder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Build an index stamped with the current time.
    pub fn build(
        &self,
        category: Category,
        records: &[EmbeddingRecord],
    ) -> Result<(Option<FlatIndex>, BuildStats)> {
        self.build_at(category, records, Utc::now())
    }

    /// Build an index stamped with `built_at`.
    ///
    /// Returns `None` when no record carries a vector for `category`; that is
    /// a no-op, not an error. A vector of the wrong length fails the build.
    pub fn build_at(
        &self,
        category: Category,
        records: &[EmbeddingRecord],
        built_at: DateTime<Utc>,
    ) -> Result<(Option<FlatIndex>, BuildStats)> {
        let mut stats = BuildStats::default();
        let mut vectors = Vec::new();
        let mut ids = Vec::new();

        for record in records {
            if record.category != category {
                stats.skipped += 1;
                continue;
            }
            if !record.vectors.is_empty() {
                stats.records += 1;
            }

            for raw in &record.vectors {
                if raw.len() != self.dimension {
                    return Err(IndexError::DimensionMismatch {
                        entity_id: record.entity_id.clone(),
                        expected: self.dimension,
                        actual: raw.len(),
                    });
                }

                let normalized = normalize(raw);
                if normalized.degenerate {
                    stats.degenerate += 1;
                    warn!(
                        category = %category,
                        entity = %record.entity_id,
                        "Degenerate (zero-norm) vector stored unnormalized"
                    );
                }
                vectors.extend_from_slice(&normalized.vector);
                ids.push(record.entity_id.clone());
                stats.vectors += 1;
            }
        }

        if stats.skipped > 0 {
            warn!(category = %category, skipped = stats.skipped, "Skipped records from another category");
        }

        if ids.is_empty() {
            debug!(category = %category, "No vectors to index, build is a no-op");
            return Ok((None, stats));
        }

        let index = FlatIndex::from_parts(category, self.dimension, vectors, ids, built_at)?;
        Ok((Some(index), stats))
    }
}
