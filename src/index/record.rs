//! Embedding Records
//!
//! Categories and the per-entity vectors that feed an index build.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Partition of the corpus; each category is indexed and searched on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// One vector per entity
    Title,
    /// Zero or more vectors per entity (aliases)
    Code,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Title, Category::Code];

    /// Stable key used for cache file names
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Title => "title",
            Category::Code => "code",
        }
    }

    pub(crate) fn tag(&self) -> u8 {
        match self {
            Category::Title => 1,
            Category::Code => 2,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Category::Title),
            2 => Some(Category::Code),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "title" => Ok(Category::Title),
            "code" => Ok(Category::Code),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

/// Vectors one entity contributes to one category.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub entity_id: String,
    pub category: Category,
    pub vectors: Vec<Vec<f32>>,
}

impl EmbeddingRecord {
    pub fn title(entity_id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            entity_id: entity_id.into(),
            category: Category::Title,
            vectors: vec![vector],
        }
    }

    pub fn code(entity_id: impl Into<String>, vectors: Vec<Vec<f32>>) -> Self {
        Self {
            entity_id: entity_id.into(),
            category: Category::Code,
            vectors,
        }
    }
}

/// Document shape delivered by the embedding source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDocument {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_embeddings: Option<Vec<Vec<f32>>>,
}

impl SourceDocument {
    /// Project the document onto one category.
    ///
    /// Returns `None` when the document lacks the field entirely; a missing
    /// field is skipped, never read as a zero vector.
    pub fn record(&self, category: Category) -> Option<EmbeddingRecord> {
        match category {
            Category::Title => self
                .title_embedding
                .as_ref()
                .map(|v| EmbeddingRecord::title(self.id.clone(), v.clone())),
            Category::Code => self
                .code_embeddings
                .as_ref()
                .map(|vs| EmbeddingRecord::code(self.id.clone(), vs.clone())),
        }
    }
}
