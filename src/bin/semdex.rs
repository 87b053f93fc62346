//! SEMDEX CLI
//!
//! Build, inspect and query persisted embedding indices.

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use semdex::{CachePolicy, Category, EngineConfig, IndexCache, IndexService, JsonlSource};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// SEMDEX - exact semantic search over embedding indices
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Directory holding the index cache
    #[arg(long, default_value = "./data/index", global = true)]
    cache_dir: PathBuf,

    /// Embedding dimension
    #[arg(long, default_value_t = 1536, global = true)]
    dimension: usize,

    /// Hours before an index counts as stale
    #[arg(long, default_value_t = 24, global = true)]
    staleness_hours: u64,

    /// Load caches regardless of age
    #[arg(long, global = true)]
    trust_cache: bool,

    /// Seconds allowed for fetching embeddings (0 = no limit)
    #[arg(long, default_value_t = 0, global = true)]
    build_timeout: u64,

    /// Drop results scoring below this cosine similarity
    #[arg(long, global = true, allow_negative_numbers = true)]
    min_similarity: Option<f32>,

    /// Candidates fetched per requested result before deduplication
    #[arg(long, default_value_t = 3, global = true)]
    over_fetch: usize,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Rebuild indices from a JSON-lines source and persist them
    Build {
        /// Source documents, one JSON object per line
        #[arg(long)]
        source: PathBuf,

        #[arg(long, value_enum, default_value_t = Which::All)]
        category: Which,
    },

    /// Search with a precomputed query embedding
    Search {
        #[arg(long)]
        source: PathBuf,

        /// Query text, used to pick the category
        #[arg(long)]
        text: String,

        /// JSON file holding the query embedding as an array of floats
        #[arg(long)]
        vector: PathBuf,

        /// Number of results
        #[arg(short, long, default_value_t = 10)]
        k: usize,
    },

    /// Show the cached index for each category
    Inspect,

    /// Delete cached indices so the next start rebuilds them
    Clear {
        #[arg(long, value_enum, default_value_t = Which::All)]
        category: Which,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Which {
    Title,
    Code,
    All,
}

impl Which {
    fn categories(self) -> Vec<Category> {
        match self {
            Which::Title => vec![Category::Title],
            Which::Code => vec![Category::Code],
            Which::All => Category::ALL.to_vec(),
        }
    }
}

impl Args {
    fn config(&self) -> EngineConfig {
        let policy = if self.trust_cache {
            CachePolicy::TrustCache
        } else {
            CachePolicy::RespectStaleness
        };
        let timeout = (self.build_timeout > 0).then(|| Duration::from_secs(self.build_timeout));

        EngineConfig::default()
            .with_dimension(self.dimension)
            .with_cache_dir(&self.cache_dir)
            .with_staleness_window(Duration::from_secs(self.staleness_hours * 60 * 60))
            .with_cache_policy(policy)
            .with_build_timeout(timeout)
            .with_min_similarity(self.min_similarity)
            .with_over_fetch(self.over_fetch)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("semdex=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.config();

    match &args.command {
        Cmd::Build { source, category } => {
            let service = IndexService::new(config, JsonlSource::new(source));
            for category in category.categories() {
                let outcome = service
                    .rebuild(category)
                    .await
                    .with_context(|| format!("building {category} index"))?;
                println!("{category}: {outcome:?}");
            }
            info!("{}", service.metrics().summary());
        }

        Cmd::Search {
            source,
            text,
            vector,
            k,
        } => {
            let raw = tokio::fs::read_to_string(vector)
                .await
                .with_context(|| format!("reading {}", vector.display()))?;
            let query: Vec<f32> = serde_json::from_str(&raw).context("parsing query vector")?;

            let service = IndexService::new(config, JsonlSource::new(source));
            for (category, outcome) in service.warm_up().await {
                match outcome {
                    Ok(outcome) => info!(category = %category, ?outcome, "Index ready"),
                    Err(e) => warn!(category = %category, error = %e, "Index unavailable"),
                }
            }

            let results = service.search(text, query, *k).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }

        Cmd::Inspect => {
            let cache = IndexCache::new(&config.cache_dir);
            for category in Category::ALL {
                match cache.load(category, config.dimension) {
                    Ok(Some(index)) => println!(
                        "{category}: {} vectors, {} entities, dimension {}, built {}{}",
                        index.len(),
                        index.entity_count(),
                        index.dimension(),
                        index.built_at(),
                        if index.is_stale(config.staleness_window, Utc::now()) {
                            " (stale)"
                        } else {
                            ""
                        }
                    ),
                    Ok(None) => println!("{category}: not cached"),
                    Err(e) => println!("{category}: unusable cache ({e})"),
                }
            }
        }

        Cmd::Clear { category } => {
            let cache = IndexCache::new(&config.cache_dir);
            for category in category.categories() {
                cache
                    .remove(category)
                    .with_context(|| format!("clearing {category} cache"))?;
                println!("{category}: cleared");
            }
        }
    }

    Ok(())
}
