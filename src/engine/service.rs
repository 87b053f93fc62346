//! Index Service
//!
//! Owns the engine, the cache and the embedding source; decides when an
//! index is loaded from disk, rebuilt, or refreshed.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::selector::{CategorySelector, DigitRunSelector};
use super::{SearchEngine, SearchResult};
use crate::config::{CachePolicy, EngineConfig};
use crate::error::{IndexError, Result};
use crate::index::{Category, EmbeddingRecord, FlatIndex, IndexBuilder};
use crate::metrics::Metrics;
use crate::persistence::IndexCache;
use crate::source::EmbeddingSource;

/// What bringing a category online did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Installed from the on-disk cache
    Loaded { rows: usize },
    /// Rebuilt from the source, persisted and installed
    Built { rows: usize, entities: usize },
    /// Rebuild failed or found nothing; the stale cache was installed instead
    Stale { rows: usize },
    /// Source had nothing for the category; installed index left as is
    Empty,
}

/// Index lifecycle around a `SearchEngine`.
///
/// Construct once at startup and share by reference or `Arc`.
pub struct IndexService<S> {
    config: EngineConfig,
    engine: SearchEngine,
    cache: IndexCache,
    builder: IndexBuilder,
    source: S,
    selector: Box<dyn CategorySelector>,
    metrics: Arc<Metrics>,
    build_lock: Mutex<()>,
    /// When each category last started a rebuild
    last_attempt: DashMap<Category, Instant>,
}

impl<S: EmbeddingSource> IndexService<S> {
    pub fn new(config: EngineConfig, source: S) -> Self {
        let metrics = Arc::new(Metrics::new());
        Self {
            engine: SearchEngine::new(&config, Arc::clone(&metrics)),
            cache: IndexCache::new(config.cache_dir.clone()),
            builder: IndexBuilder::new(config.dimension),
            source,
            selector: Box::new(DigitRunSelector::default()),
            metrics,
            build_lock: Mutex::new(()),
            last_attempt: DashMap::new(),
            config,
        }
    }

    /// Replace the query routing policy
    pub fn with_selector(mut self, selector: impl CategorySelector + 'static) -> Self {
        self.selector = Box::new(selector);
        self
    }

    pub fn engine(&self) -> &SearchEngine {
        &self.engine
    }

    pub fn cache(&self) -> &IndexCache {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Bring every category online before the first search.
    ///
    /// Each category is attempted even when an earlier one fails.
    pub async fn warm_up(&self) -> Vec<(Category, Result<BuildOutcome>)> {
        let mut outcomes = Vec::with_capacity(Category::ALL.len());
        for category in Category::ALL {
            let outcome = self.load_or_build(category).await;
            if let Err(e) = &outcome {
                warn!(category = %category, error = %e, "Category unavailable after warm-up");
            }
            outcomes.push((category, outcome));
        }
        outcomes
    }

    /// Install the cached index for `category`, or rebuild when the cache is
    /// missing, unreadable, or (under `RespectStaleness`) too old.
    ///
    /// A stale cache is still installed if the rebuild fails or comes back
    /// empty and nothing else is serving the category.
    pub async fn load_or_build(&self, category: Category) -> Result<BuildOutcome> {
        let cache = self.cache.clone();
        let dimension = self.config.dimension;
        let loaded = tokio::task::spawn_blocking(move || cache.load(category, dimension)).await?;

        let stale = match loaded {
            Ok(Some(index)) if self.accepts_cached(&index) => {
                let rows = index.len();
                self.engine.install(index)?;
                self.metrics.record_cache_hit();
                info!(category = %category, rows, "Loaded index from cache");
                return Ok(BuildOutcome::Loaded { rows });
            }
            Ok(Some(index)) => {
                info!(
                    category = %category,
                    built_at = %index.built_at(),
                    "Cached index is stale, rebuilding"
                );
                Some(index)
            }
            Ok(None) => {
                info!(category = %category, "No cached index, building");
                None
            }
            Err(e) if e.is_cache_corruption() => {
                warn!(category = %category, error = %e, "Corrupt index cache, rebuilding");
                None
            }
            Err(e) => {
                warn!(category = %category, error = %e, "Could not read index cache, rebuilding");
                None
            }
        };

        self.metrics.record_cache_miss();
        let rebuilt = self.rebuild(category).await;

        match (rebuilt, stale) {
            (Ok(BuildOutcome::Empty), Some(index)) if !self.engine.has_index(category) => {
                warn!(category = %category, "Source is empty, serving stale cached index");
                self.install_stale(index)
            }
            (Err(e), Some(index)) if !self.engine.has_index(category) => {
                warn!(category = %category, error = %e, "Rebuild failed, serving stale cached index");
                self.install_stale(index)
            }
            (rebuilt, _) => rebuilt,
        }
    }

    /// Rebuild `category` from the source, persist it and install it.
    ///
    /// On any failure the previously installed index stays live.
    pub async fn rebuild(&self, category: Category) -> Result<BuildOutcome> {
        let _guard = self.build_lock.lock().await;
        self.rebuild_locked(category).await
    }

    /// Rebuild `category` if its installed index has outlived the staleness
    /// window. Returns `None` when nothing needed doing.
    ///
    /// Refreshes of one category are spaced by `refresh_retry`, and a query
    /// that finds another rebuild in progress serves the current index
    /// instead of queueing behind it.
    pub async fn ensure_fresh(&self, category: Category) -> Result<Option<BuildOutcome>> {
        if !self.is_stale(category) {
            return Ok(None);
        }
        if self.attempted_recently(category) {
            debug!(category = %category, "Stale index, refresh retried too recently");
            return Ok(None);
        }
        let Ok(_guard) = self.build_lock.try_lock() else {
            debug!(category = %category, "Rebuild already running, serving current index");
            return Ok(None);
        };
        info!(category = %category, "Index is stale, rebuilding");
        self.rebuild_locked(category).await.map(Some)
    }

    /// Route `query_text` to a category and search it with `query_vector`.
    pub async fn search(
        &self,
        query_text: &str,
        query_vector: Vec<f32>,
        k: usize,
    ) -> Result<Vec<SearchResult>> {
        let category = self.selector.select(query_text);
        self.search_category(category, query_vector, k).await
    }

    /// Refresh `category` if stale, then search it.
    ///
    /// A failed refresh is logged and the previous index keeps serving.
    pub async fn search_category(
        &self,
        category: Category,
        query_vector: Vec<f32>,
        k: usize,
    ) -> Result<Vec<SearchResult>> {
        if let Err(e) = self.ensure_fresh(category).await {
            warn!(category = %category, error = %e, "Index refresh failed, serving previous index");
        }
        self.engine.search(category, query_vector, k).await
    }

    fn install_stale(&self, index: FlatIndex) -> Result<BuildOutcome> {
        let rows = index.len();
        self.engine.install(index)?;
        Ok(BuildOutcome::Stale { rows })
    }

    fn accepts_cached(&self, index: &FlatIndex) -> bool {
        match self.config.cache_policy {
            CachePolicy::TrustCache => true,
            CachePolicy::RespectStaleness => {
                !index.is_stale(self.config.staleness_window, Utc::now())
            }
        }
    }

    fn is_stale(&self, category: Category) -> bool {
        self.engine
            .index(category)
            .map(|index| index.is_stale(self.config.staleness_window, Utc::now()))
            .unwrap_or(false)
    }

    fn attempted_recently(&self, category: Category) -> bool {
        self.last_attempt
            .get(&category)
            .map(|at| at.elapsed() < self.config.refresh_retry)
            .unwrap_or(false)
    }

    async fn fetch(&self, category: Category) -> Result<Vec<EmbeddingRecord>> {
        let fetch = self.source.fetch(category);
        match self.config.build_timeout {
            Some(limit) => tokio::time::timeout(limit, fetch)
                .await
                .map_err(|_| IndexError::Timeout(limit))?,
            None => fetch.await,
        }
    }

    async fn rebuild_locked(&self, category: Category) -> Result<BuildOutcome> {
        let start = Instant::now();
        self.last_attempt.insert(category, start);
        let records = self.fetch(category).await?;

        let builder = self.builder;
        let (index, stats) =
            tokio::task::spawn_blocking(move || builder.build(category, &records)).await??;
        self.metrics.record_degenerate(stats.degenerate as u64);

        let Some(index) = index else {
            info!(category = %category, "Embedding source is empty, nothing to index");
            return Ok(BuildOutcome::Empty);
        };

        let index = Arc::new(index);
        let cache = self.cache.clone();
        let to_save = Arc::clone(&index);
        tokio::task::spawn_blocking(move || cache.save(&to_save)).await??;

        let rows = index.len();
        let entities = index.entity_count();
        self.engine.install(index)?;
        self.metrics.record_operation("build", start.elapsed());

        info!(
            category = %category,
            rows,
            entities,
            degenerate = stats.degenerate,
            elapsed = ?start.elapsed(),
            "Index built"
        );
        Ok(BuildOutcome::Built { rows, entities })
    }
}
