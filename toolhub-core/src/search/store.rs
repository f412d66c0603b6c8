use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::{SearchError, SearchResult};

/// A named partition of documents sharing one embedding configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub embedding_model: String,
    pub dimensions: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub content_hash: String,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let content_hash = content_hash(&text);
        Self {
            id: id.into(),
            text,
            metadata: Map::new(),
            content_hash,
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Use a caller-supplied hash instead of the derived one
    pub fn with_hash(mut self, content_hash: impl Into<String>) -> Self {
        self.content_hash = content_hash.into();
        self
    }
}

pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredCollection {
    pub info: CollectionInfo,
    #[serde(default)]
    pub documents: BTreeMap<String, Document>,
}

/// What an upsert did to an existing document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Upsert {
    Inserted,
    Updated,
    Unchanged,
}

/// Documents of every collection, keyed by collection then id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentStore {
    collections: BTreeMap<String, StoredCollection>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or update a collection. Returns true when the embedding
    /// configuration changed, which invalidates the collection's index.
    pub fn upsert_collection(&mut self, info: CollectionInfo) -> bool {
        match self.collections.get_mut(&info.name) {
            Some(existing) => {
                let changed = existing.info.dimensions != info.dimensions
                    || existing.info.embedding_model != info.embedding_model;
                existing.info.description = info.description;
                existing.info.dimensions = info.dimensions;
                existing.info.embedding_model = info.embedding_model;
                changed
            }
            None => {
                self.collections.insert(
                    info.name.clone(),
                    StoredCollection {
                        info,
                        documents: BTreeMap::new(),
                    },
                );
                false
            }
        }
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionInfo> {
        self.collections.get(name).map(|stored| &stored.info)
    }

    pub fn collections(&self) -> Vec<CollectionInfo> {
        self.collections
            .values()
            .map(|stored| stored.info.clone())
            .collect()
    }

    pub fn drop_collection(&mut self, name: &str) -> bool {
        self.collections.remove(name).is_some()
    }

    fn stored(&self, collection: &str) -> SearchResult<&StoredCollection> {
        self.collections
            .get(collection)
            .ok_or_else(|| SearchError::UnknownCollection(collection.to_string()))
    }

    fn stored_mut(&mut self, collection: &str) -> SearchResult<&mut StoredCollection> {
        self.collections
            .get_mut(collection)
            .ok_or_else(|| SearchError::UnknownCollection(collection.to_string()))
    }

    /// Insert or replace by id. Same id and hash reports `Unchanged`; the
    /// metadata is still refreshed since it does not affect the vector.
    pub(crate) fn upsert(&mut self, collection: &str, document: Document) -> SearchResult<Upsert> {
        let stored = self.stored_mut(collection)?;
        let outcome = match stored.documents.get(&document.id) {
            Some(existing) if existing.content_hash == document.content_hash => Upsert::Unchanged,
            Some(_) => Upsert::Updated,
            None => Upsert::Inserted,
        };
        stored.documents.insert(document.id.clone(), document);
        Ok(outcome)
    }

    pub fn remove(&mut self, collection: &str, id: &str) -> SearchResult<bool> {
        Ok(self.stored_mut(collection)?.documents.remove(id).is_some())
    }

    pub fn get(&self, collection: &str, id: &str) -> SearchResult<Option<&Document>> {
        Ok(self.stored(collection)?.documents.get(id))
    }

    pub fn contains(&self, collection: &str, id: &str) -> bool {
        self.collections
            .get(collection)
            .is_some_and(|stored| stored.documents.contains_key(id))
    }

    /// Documents in id order
    pub fn documents(&self, collection: &str) -> SearchResult<Vec<&Document>> {
        Ok(self.stored(collection)?.documents.values().collect())
    }

    pub fn len(&self, collection: &str) -> SearchResult<usize> {
        Ok(self.stored(collection)?.documents.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(dimensions: usize) -> CollectionInfo {
        CollectionInfo {
            name: "docs".into(),
            description: String::new(),
            embedding_model: "hashing-v1".into(),
            dimensions,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn upsert_collection_reports_dimension_changes() {
        let mut store = DocumentStore::new();
        assert!(!store.upsert_collection(info(8)));
        assert!(!store.upsert_collection(info(8)));
        assert!(store.upsert_collection(info(16)));
        assert_eq!(store.collection("docs").map(|c| c.dimensions), Some(16));
    }

    #[test]
    fn document_upserts_are_idempotent() -> SearchResult<()> {
        let mut store = DocumentStore::new();
        store.upsert_collection(info(8));

        assert_eq!(store.upsert("docs", Document::new("a", "alpha"))?, Upsert::Inserted);
        assert_eq!(store.upsert("docs", Document::new("a", "alpha"))?, Upsert::Unchanged);
        assert_eq!(store.upsert("docs", Document::new("a", "beta"))?, Upsert::Updated);
        assert_eq!(store.len("docs")?, 1);
        assert!(matches!(
            store.upsert("missing", Document::new("a", "alpha")),
            Err(SearchError::UnknownCollection(_))
        ));
        Ok(())
    }
}
