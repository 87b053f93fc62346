//! Embedding Sources
//!
//! Pull-based suppliers of stored embeddings. The document store and the
//! embedding provider live outside this crate; they plug in here.

use parking_lot::RwLock;
use std::future::Future;
use std::path::PathBuf;
use tracing::debug;

use crate::error::{IndexError, Result};
use crate::index::{Category, EmbeddingRecord, SourceDocument};

/// Supplies every record that carries a vector for a category
pub trait EmbeddingSource: Send + Sync {
    /// Fetch the records for `category`, omitting documents without the field
    fn fetch(
        &self,
        category: Category,
    ) -> impl Future<Output = Result<Vec<EmbeddingRecord>>> + Send;
}

fn project(docs: &[SourceDocument], category: Category) -> Vec<EmbeddingRecord> {
    docs.iter().filter_map(|doc| doc.record(category)).collect()
}

/// Documents stored one JSON object per line
#[derive(Debug, Clone)]
pub struct JsonlSource {
    path: PathBuf,
}

impl JsonlSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Read and parse every document in the file
    pub async fn documents(&self) -> Result<Vec<SourceDocument>> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        let mut docs = Vec::new();
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let doc = serde_json::from_str(line).map_err(|source| IndexError::Json {
                line: i + 1,
                source,
            })?;
            docs.push(doc);
        }
        debug!(path = %self.path.display(), documents = docs.len(), "Loaded source documents");
        Ok(docs)
    }
}

impl EmbeddingSource for JsonlSource {
    async fn fetch(&self, category: Category) -> Result<Vec<EmbeddingRecord>> {
        let docs = self.documents().await?;
        Ok(project(&docs, category))
    }
}

/// In-memory documents that can be swapped between builds
#[derive(Debug, Default)]
pub struct MemorySource {
    docs: RwLock<Vec<SourceDocument>>,
}

impl MemorySource {
    pub fn new(docs: Vec<SourceDocument>) -> Self {
        Self {
            docs: RwLock::new(docs),
        }
    }

    /// Replace the stored documents; the next build sees the new set
    pub fn replace(&self, docs: Vec<SourceDocument>) {
        *self.docs.write() = docs;
    }

    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }
}

impl EmbeddingSource for MemorySource {
    async fn fetch(&self, category: Category) -> Result<Vec<EmbeddingRecord>> {
        Ok(project(&self.docs.read(), category))
    }
}
