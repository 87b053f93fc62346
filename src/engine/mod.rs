//! Search Engine
//!
//! Holds one installed index per category and answers top-k queries with
//! per-entity deduplication.

mod selector;
mod service;

pub use selector::{select_category, CategorySelector, DigitRunSelector};
pub use service::{BuildOutcome, IndexService};

use dashmap::DashMap;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{IndexError, Result};
use crate::index::{Category, FlatIndex, Neighbor};
use crate::metrics::Metrics;
use crate::vector::normalize;

/// One ranked hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(rename = "id")]
    pub entity_id: String,
    /// Cosine similarity in [-1, 1]
    pub similarity: f32,
}

/// Search engine over per-category flat indices.
///
/// Each category maps to an `Arc<FlatIndex>`. Installing replaces the `Arc`
/// in one step, so a search sees either the old or the new index, never a
/// mix. Cloning the engine shares the installed indices.
#[derive(Clone)]
pub struct SearchEngine {
    indices: Arc<DashMap<Category, Arc<FlatIndex>>>,
    dimension: usize,
    over_fetch: usize,
    min_similarity: Option<f32>,
    metrics: Arc<Metrics>,
}

impl SearchEngine {
    pub fn new(config: &EngineConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            indices: Arc::new(DashMap::new()),
            dimension: config.dimension,
            over_fetch: config.over_fetch.max(1),
            min_similarity: config.min_similarity,
            metrics,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Install `index` as the current index for its category.
    ///
    /// Returns the index it replaced, if any.
    pub fn install(&self, index: impl Into<Arc<FlatIndex>>) -> Result<Option<Arc<FlatIndex>>> {
        let index = index.into();
        if index.dimension() != self.dimension {
            return Err(IndexError::InvalidFormat(format!(
                "index dimension {} does not match engine dimension {}",
                index.dimension(),
                self.dimension
            )));
        }
        let category = index.category();
        debug!(category = %category, rows = index.len(), "Installing index");
        Ok(self.indices.insert(category, index))
    }

    /// Current index for `category`
    pub fn index(&self, category: Category) -> Option<Arc<FlatIndex>> {
        self.indices.get(&category).map(|entry| Arc::clone(entry.value()))
    }

    pub fn has_index(&self, category: Category) -> bool {
        self.indices.contains_key(&category)
    }

    /// Search on a blocking-pool thread so ranking never stalls the runtime.
    pub async fn search(
        &self,
        category: Category,
        query: Vec<f32>,
        k: usize,
    ) -> Result<Vec<SearchResult>> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.search_blocking(category, &query, k)).await?
    }

    /// Top-`k` entities for `query` in `category`.
    ///
    /// Returns an empty list when the category has no index. Candidates are
    /// over-fetched so entities owning several vectors do not crowd out the
    /// result; each entity keeps its best score.
    pub fn search_blocking(
        &self,
        category: Category,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<SearchResult>> {
        let start = Instant::now();

        let Some(index) = self.index(category) else {
            debug!(category = %category, "No index installed, returning no results");
            return Ok(Vec::new());
        };

        if query.len() != index.dimension() {
            return Err(IndexError::QueryDimension {
                expected: index.dimension(),
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let query = normalize(query);
        if query.degenerate {
            warn!(category = %category, "Degenerate (zero-norm) query vector");
            self.metrics.record_degenerate(1);
        }

        let candidates = index.knn(&query.vector, k.saturating_mul(self.over_fetch));
        let mut results = best_per_entity(&index, &candidates);

        // Stable: equal scores keep the order the index ranked them in
        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        if let Some(min) = self.min_similarity {
            results.retain(|r| r.similarity >= min);
        }
        results.truncate(k);

        self.metrics.record_operation("search", start.elapsed());
        Ok(results)
    }
}

/// Collapse candidates to one result per entity, keeping the maximum score
/// and first-seen order.
fn best_per_entity(index: &FlatIndex, candidates: &[Neighbor]) -> Vec<SearchResult> {
    let mut position: HashMap<&str, usize> = HashMap::with_capacity(candidates.len());
    let mut results: Vec<SearchResult> = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let id = index.id(candidate.row);
        match position.get(id) {
            Some(&i) => {
                if candidate.score > results[i].similarity {
                    results[i].similarity = candidate.score;
                }
            }
            None => {
                position.insert(id, results.len());
                results.push(SearchResult {
                    entity_id: id.to_owned(),
                    similarity: candidate.score,
                });
            }
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{EmbeddingRecord, IndexBuilder};

    fn engine(dimension: usize) -> SearchEngine {
        let config = EngineConfig::default().with_dimension(dimension);
        SearchEngine::new(&config, Arc::new(Metrics::new()))
    }

    fn install(engine: &SearchEngine, category: Category, records: &[EmbeddingRecord]) {
        let (index, _) = IndexBuilder::new(engine.dimension())
            .build(category, records)
            .unwrap();
        engine.install(index.unwrap()).unwrap();
    }

    #[test]
    fn test_missing_index_returns_empty() {
        let engine = engine(3);
        let results = engine.search_blocking(Category::Code, &[1.0, 0.0, 0.0], 5).unwrap();
        assert!(results.is_empty());

        // Even a wrongly sized query is not an error while nothing is installed
        assert!(engine.search_blocking(Category::Title, &[1.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_exact_vector_finds_itself() {
        let engine = engine(3);
        let b = vec![3.0, -1.0, 0.5];
        install(
            &engine,
            Category::Title,
            &[
                EmbeddingRecord::title("A", vec![1.0, 2.0, 3.0]),
                EmbeddingRecord::title("B", b.clone()),
                EmbeddingRecord::title("C", vec![0.0, 1.0, -2.0]),
            ],
        );

        let results = engine.search_blocking(Category::Title, &b, 1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entity_id, "B");
        assert!((results[0].similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_titles_ranked_by_similarity() {
        let engine = engine(3);
        install(
            &engine,
            Category::Title,
            &[
                EmbeddingRecord::title("T1", vec![0.0, 0.0, 1.0]), // Intro to Programming
                EmbeddingRecord::title("T2", vec![1.0, 0.1, 0.0]), // Data Structures
                EmbeddingRecord::title("T3", vec![0.5, 1.0, 0.0]), // Operating Systems
            ],
        );

        let results = engine.search_blocking(Category::Title, &[1.0, 0.2, 0.0], 2).unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["T2", "T3"]);
        assert!(results[0].similarity > results[1].similarity);
    }

    #[test]
    fn test_entity_with_many_vectors_appears_once() {
        let engine = engine(3);
        install(
            &engine,
            Category::Code,
            &[
                EmbeddingRecord::code(
                    "E",
                    vec![vec![1.0, 0.0, 0.0], vec![0.8, 0.6, 0.0], vec![-1.0, 0.0, 0.0]],
                ),
                EmbeddingRecord::code("F", vec![vec![0.6, 0.8, 0.0]]),
                EmbeddingRecord::code("G", vec![vec![0.0, 0.0, 1.0]]),
            ],
        );

        // k = 1 fetches 3 candidates: E (1.0), E (0.8), F (0.6)
        let results = engine.search_blocking(Category::Code, &[1.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entity_id, "E");
        assert!((results[0].similarity - 1.0).abs() < 1e-6);

        let results = engine.search_blocking(Category::Code, &[1.0, 0.0, 0.0], 3).unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["E", "F", "G"]);
    }

    #[test]
    fn test_dedup_keeps_max_score() {
        let index = FlatIndex::from_parts(
            Category::Code,
            1,
            vec![1.0, 1.0, 1.0],
            vec!["x".into(), "y".into(), "x".into()],
            chrono::Utc::now(),
        )
        .unwrap();
        let candidates = [
            Neighbor { row: 0, score: 0.4 },
            Neighbor { row: 1, score: 0.5 },
            Neighbor { row: 2, score: 0.9 },
        ];
        let results = best_per_entity(&index, &candidates);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].entity_id, "x");
        assert!((results[0].similarity - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_fewer_entities_than_k() {
        let engine = engine(2);
        install(
            &engine,
            Category::Title,
            &[
                EmbeddingRecord::title("a", vec![1.0, 0.0]),
                EmbeddingRecord::title("b", vec![0.0, 1.0]),
            ],
        );

        let results = engine.search_blocking(Category::Title, &[1.0, 1.0], 5).unwrap();
        assert_eq!(results.len(), 2);
        assert_ne!(results[0].entity_id, results[1].entity_id);
    }

    #[test]
    fn test_negative_similarities_are_kept() {
        let engine = engine(2);
        install(&engine, Category::Title, &[EmbeddingRecord::title("far", vec![-1.0, 0.0])]);

        let results = engine.search_blocking(Category::Title, &[1.0, 0.0], 3).unwrap();
        assert_eq!(results.len(), 1);
        assert!((results[0].similarity + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_min_similarity_filters() {
        let config = EngineConfig::default()
            .with_dimension(2)
            .with_min_similarity(Some(0.0));
        let engine = SearchEngine::new(&config, Arc::new(Metrics::new()));
        install(
            &engine,
            Category::Title,
            &[
                EmbeddingRecord::title("near", vec![1.0, 0.1]),
                EmbeddingRecord::title("far", vec![-1.0, 0.0]),
            ],
        );

        let results = engine.search_blocking(Category::Title, &[1.0, 0.0], 3).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entity_id, "near");
    }

    #[test]
    fn test_zero_query_is_not_an_error() {
        let metrics = Arc::new(Metrics::new());
        let engine = SearchEngine::new(&EngineConfig::default().with_dimension(2), metrics.clone());
        install(
            &engine,
            Category::Title,
            &[
                EmbeddingRecord::title("a", vec![1.0, 0.0]),
                EmbeddingRecord::title("b", vec![0.0, 1.0]),
            ],
        );

        let results = engine.search_blocking(Category::Title, &[0.0, 0.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.similarity == 0.0));
        // Ties keep index order
        assert_eq!(results[0].entity_id, "a");
        assert_eq!(metrics.degenerate_vectors(), 1);
    }

    #[test]
    fn test_query_dimension_checked() {
        let engine = engine(2);
        install(&engine, Category::Title, &[EmbeddingRecord::title("a", vec![1.0, 0.0])]);
        let err = engine.search_blocking(Category::Title, &[1.0, 0.0, 0.0], 1).unwrap_err();
        assert!(matches!(err, IndexError::QueryDimension { expected: 2, actual: 3 }));
    }

    #[test]
    fn test_install_replaces_wholesale() {
        let engine = engine(2);
        install(&engine, Category::Title, &[EmbeddingRecord::title("old", vec![1.0, 0.0])]);
        let held = engine.index(Category::Title).unwrap();

        install(&engine, Category::Title, &[EmbeddingRecord::title("new", vec![1.0, 0.0])]);

        // A search that grabbed the old index keeps a consistent view
        assert_eq!(held.ids(), &["old".to_string()]);
        let results = engine.search_blocking(Category::Title, &[1.0, 0.0], 1).unwrap();
        assert_eq!(results[0].entity_id, "new");
    }

    #[test]
    fn test_install_rejects_wrong_dimension() {
        let engine = engine(3);
        let (index, _) = IndexBuilder::new(2)
            .build(Category::Title, &[EmbeddingRecord::title("a", vec![1.0, 0.0])])
            .unwrap();
        assert!(engine.install(index.unwrap()).is_err());
        assert!(!engine.has_index(Category::Title));
    }

    #[tokio::test]
    async fn test_async_search_matches_blocking() {
        let engine = engine(2);
        install(
            &engine,
            Category::Code,
            &[EmbeddingRecord::code("c", vec![vec![0.3, 0.7], vec![0.9, 0.1]])],
        );
        let blocking = engine.search_blocking(Category::Code, &[1.0, 0.0], 2).unwrap();
        let pooled = engine.search(Category::Code, vec![1.0, 0.0], 2).await.unwrap();
        assert_eq!(blocking, pooled);
        assert_eq!(pooled.len(), 1);
    }

    #[test]
    fn test_over_fetch_factor_controls_candidates() {
        let records = [
            EmbeddingRecord::code("E", vec![vec![1.0, 0.0], vec![0.9, 0.1]]),
            EmbeddingRecord::code("F", vec![vec![0.5, 0.5]]),
        ];

        // Without over-fetch, E's two vectors fill both candidate slots
        let config = EngineConfig::default().with_dimension(2).with_over_fetch(0);
        assert_eq!(config.over_fetch, 1);
        let narrow = SearchEngine::new(&config, Arc::new(Metrics::new()));
        install(&narrow, Category::Code, &records);
        let results = narrow.search_blocking(Category::Code, &[1.0, 0.0], 2).unwrap();
        assert_eq!(results.len(), 1);

        let wide = engine(2);
        install(&wide, Category::Code, &records);
        let results = wide.search_blocking(Category::Code, &[1.0, 0.0], 2).unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["E", "F"]);
    }
}
