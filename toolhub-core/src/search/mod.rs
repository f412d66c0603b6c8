//! Hybrid keyword + vector search over named document collections
//!
//! A collection owns its documents ([`DocumentStore`]) and exactly one
//! [`VectorIndex`] of fixed dimensionality. Queries are answered by BM25
//! keyword scoring, cosine similarity against an [`Embedder`]'s query vector,
//! or a weighted fusion of both.

mod embedder;
mod engine;
mod index;
mod keyword;
mod store;

pub use embedder::{
    Embedder, HashingEmbedder, OpenAiEmbedder, UnavailableEmbedder, embedder_from_config,
};
pub use engine::{ConsistencyReport, InsertReport, SearchEngine};
pub use index::{VectorIndex, cosine_similarity, normalize};
pub use keyword::{Bm25Scorer, tokenize};
pub use store::{CollectionInfo, Document, DocumentStore};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("unknown collection '{0}'")]
    UnknownCollection(String),

    #[error(
        "embedding dimension mismatch in collection '{collection}': expected {expected}, got {actual}"
    )]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    #[error("index for collection '{collection}' is out of sync with its documents; rebuild required")]
    IndexOutOfSync { collection: String },

    #[error("embedding provider error: {0}")]
    Embedding(String),

    #[error("alpha must be within [0, 1], got {0}")]
    InvalidAlpha(f64),

    #[error("search engine is closed")]
    Closed,

    #[error("search storage error at {path}: {message}")]
    Storage { path: PathBuf, message: String },
}

impl SearchError {
    /// Misconfiguration rather than a transient failure
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SearchError::DimensionMismatch { .. } | SearchError::InvalidAlpha(_)
        )
    }
}

pub type SearchResult<T> = std::result::Result<T, SearchError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    Keyword,
    Embedding,
    #[default]
    Hybrid,
}

impl fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SearchMethod::Keyword => "keyword",
            SearchMethod::Embedding => "embedding",
            SearchMethod::Hybrid => "hybrid",
        })
    }
}

impl FromStr for SearchMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "keyword" => Ok(SearchMethod::Keyword),
            "embedding" | "vector" => Ok(SearchMethod::Embedding),
            "hybrid" => Ok(SearchMethod::Hybrid),
            other => Err(format!("unknown search method '{other}'")),
        }
    }
}

/// One ranked document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
    pub text: String,
    pub metadata: Map<String, Value>,
}

impl SearchHit {
    pub(crate) fn from_document(document: &Document, score: f64) -> Self {
        Self {
            id: document.id.clone(),
            score,
            text: document.text.clone(),
            metadata: document.metadata.clone(),
        }
    }
}
