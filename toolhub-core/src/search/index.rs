use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{SearchError, SearchResult};

/// Scale a vector to unit length. Zero vectors are left as is.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Cosine similarity in [-1, 1]; 0 when either side is a zero vector
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// Exhaustive nearest-neighbor index over unit vectors of one dimensionality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndex {
    collection: String,
    embedding_model: String,
    dimensions: usize,
    vectors: BTreeMap<String, Vec<f32>>,
}

impl VectorIndex {
    pub fn new(
        collection: impl Into<String>,
        embedding_model: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            collection: collection.into(),
            embedding_model: embedding_model.into(),
            dimensions,
            vectors: BTreeMap::new(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.vectors.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.vectors.keys()
    }

    pub fn check_dimensions(&self, actual: usize) -> SearchResult<()> {
        if actual != self.dimensions {
            return Err(SearchError::DimensionMismatch {
                collection: self.collection.clone(),
                expected: self.dimensions,
                actual,
            });
        }
        Ok(())
    }

    /// Store a vector for `id`, replacing any previous one
    pub fn insert(&mut self, id: impl Into<String>, mut vector: Vec<f32>) -> SearchResult<()> {
        self.check_dimensions(vector.len())?;
        normalize(&mut vector);
        self.vectors.insert(id.into(), vector);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.vectors.remove(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&[f32]> {
        self.vectors.get(id).map(Vec::as_slice)
    }

    /// Drop every vector and adopt a new embedding configuration
    pub fn reset(&mut self, embedding_model: impl Into<String>, dimensions: usize) {
        self.embedding_model = embedding_model.into();
        self.dimensions = dimensions;
        self.vectors.clear();
    }

    /// Similarity of every indexed vector to `query`, highest first, ties by id
    pub fn score_all(&self, query: &[f32]) -> SearchResult<Vec<(String, f32)>> {
        self.check_dimensions(query.len())?;
        let mut scored: Vec<(String, f32)> = self
            .vectors
            .iter()
            .map(|(id, vector)| (id.clone(), cosine_similarity(query, vector)))
            .collect();
        scored.sort_by(|(id_a, a), (id_b, b)| {
            b.partial_cmp(a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| id_a.cmp(id_b))
        });
        Ok(scored)
    }

    pub fn search(&self, query: &[f32], top_k: usize) -> SearchResult<Vec<(String, f32)>> {
        let mut scored = self.score_all(query)?;
        scored.truncate(top_k);
        Ok(scored)
    }
}
