//! Engine Configuration

use std::path::PathBuf;
use std::time::Duration;

/// How a cache found on disk is weighed against the staleness window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Reject caches older than the staleness window and rebuild instead
    #[default]
    RespectStaleness,
    /// Install any valid cache regardless of age; only manual deletion invalidates it
    TrustCache,
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Embedding dimension shared by every category
    pub dimension: usize,

    /// Directory holding the per-category cache artifacts
    pub cache_dir: PathBuf,

    /// Maximum index age before a rebuild is due
    pub staleness_window: Duration,

    /// Candidates fetched per requested result, before deduplication
    pub over_fetch: usize,

    /// Precedence between a present cache and a stale one
    pub cache_policy: CachePolicy,

    /// Drop results below this similarity (None = keep everything)
    pub min_similarity: Option<f32>,

    /// Upper bound on fetching embeddings for a rebuild
    pub build_timeout: Option<Duration>,

    /// Minimum spacing between query-time refresh attempts of one category
    pub refresh_retry: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dimension: 1536, // text-embedding-3-small
            cache_dir: PathBuf::from("./data/index"),
            staleness_window: Duration::from_secs(24 * 60 * 60),
            over_fetch: 3,
            cache_policy: CachePolicy::RespectStaleness,
            min_similarity: None,
            build_timeout: None,
            refresh_retry: Duration::from_secs(5 * 60),
        }
    }
}

impl EngineConfig {
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_staleness_window(mut self, window: Duration) -> Self {
        self.staleness_window = window;
        self
    }

    /// Set the over-fetch factor (clamped to at least 1)
    pub fn with_over_fetch(mut self, factor: usize) -> Self {
        self.over_fetch = factor.max(1);
        self
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    pub fn with_min_similarity(mut self, threshold: Option<f32>) -> Self {
        self.min_similarity = threshold;
        self
    }

    pub fn with_build_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.build_timeout = timeout;
        self
    }

    pub fn with_refresh_retry(mut self, interval: Duration) -> Self {
        self.refresh_retry = interval;
        self
    }
}
