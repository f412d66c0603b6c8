use chrono::Utc;
use parking_lot::RwLock as SyncRwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::embedder::Embedder;
use super::index::VectorIndex;
use super::keyword::Bm25Scorer;
use super::store::{CollectionInfo, Document, DocumentStore, Upsert};
use super::{SearchError, SearchHit, SearchMethod, SearchResult};
use crate::config::constants::paths::{DOCUMENTS_FILE, INDEX_DIR};

/// Outcome of an `insert_docs` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InsertReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub embedded: usize,
    /// Documents stored without a vector because the embedder failed
    pub missing_vectors: usize,
}

/// Agreement between a collection's documents and its index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    pub collection: String,
    pub documents: usize,
    pub vectors: usize,
    /// Index entries whose document no longer exists
    pub dangling_vectors: Vec<String>,
    /// Documents without an index entry
    pub missing_vectors: Vec<String>,
    pub dimension_mismatch: bool,
}

impl ConsistencyReport {
    /// Dangling entries or a wrong-dimension index require a rebuild;
    /// missing vectors only lower those documents' rank.
    pub fn needs_rebuild(&self) -> bool {
        !self.dangling_vectors.is_empty() || self.dimension_mismatch
    }
}

struct EngineState {
    store: DocumentStore,
    indexes: BTreeMap<String, VectorIndex>,
    stale: BTreeSet<String>,
    open: bool,
}

impl EngineState {
    fn ensure_open(&self) -> SearchResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(SearchError::Closed)
        }
    }

    fn info(&self, collection: &str) -> SearchResult<&CollectionInfo> {
        self.ensure_open()?;
        self.store
            .collection(collection)
            .ok_or_else(|| SearchError::UnknownCollection(collection.to_string()))
    }

    fn index(&self, collection: &str) -> SearchResult<&VectorIndex> {
        self.indexes
            .get(collection)
            .ok_or_else(|| SearchError::UnknownCollection(collection.to_string()))
    }

    fn index_mut(&mut self, collection: &str) -> SearchResult<&mut VectorIndex> {
        self.indexes
            .get_mut(collection)
            .ok_or_else(|| SearchError::UnknownCollection(collection.to_string()))
    }

    fn check(&self, collection: &str) -> SearchResult<ConsistencyReport> {
        let info = self.info(collection)?;
        let index = self.index(collection)?;
        let documents = self.store.documents(collection)?;

        let dangling_vectors = index
            .ids()
            .filter(|id| !self.store.contains(collection, id))
            .cloned()
            .collect();
        let missing_vectors = documents
            .iter()
            .filter(|document| !index.contains(&document.id))
            .map(|document| document.id.clone())
            .collect();

        Ok(ConsistencyReport {
            collection: collection.to_string(),
            documents: documents.len(),
            vectors: index.len(),
            dangling_vectors,
            missing_vectors,
            dimension_mismatch: index.dimensions() != info.dimensions,
        })
    }

    fn ensure_in_sync(&self, collection: &str) -> SearchResult<()> {
        if self.stale.contains(collection) {
            return Err(SearchError::IndexOutOfSync {
                collection: collection.to_string(),
            });
        }
        Ok(())
    }
}

/// Document store, per-collection vector indexes and embedders behind one API
pub struct SearchEngine {
    data_dir: Option<PathBuf>,
    default_embedder: Arc<dyn Embedder>,
    embedders: SyncRwLock<HashMap<String, Arc<dyn Embedder>>>,
    state: RwLock<EngineState>,
}

impl SearchEngine {
    /// Engine without persistence
    pub fn in_memory(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            data_dir: None,
            default_embedder: embedder,
            embedders: SyncRwLock::new(HashMap::new()),
            state: RwLock::new(EngineState {
                store: DocumentStore::new(),
                indexes: BTreeMap::new(),
                stale: BTreeSet::new(),
                open: true,
            }),
        }
    }

    /// Open (or create) the persisted state under `data_dir`. Collections
    /// whose index disagrees with their documents are marked stale.
    pub async fn open(data_dir: impl Into<PathBuf>, embedder: Arc<dyn Embedder>) -> SearchResult<Self> {
        let data_dir = data_dir.into();
        let store = load_documents(&data_dir.join(DOCUMENTS_FILE))?;
        let mut indexes = load_indexes(&data_dir.join(INDEX_DIR))?;

        indexes.retain(|name, _| {
            let known = store.collection(name).is_some();
            if !known {
                warn!(collection = %name, "dropping index without a collection");
            }
            known
        });
        for info in store.collections() {
            indexes
                .entry(info.name.clone())
                .or_insert_with(|| VectorIndex::new(&info.name, &info.embedding_model, info.dimensions));
        }

        let mut state = EngineState {
            store,
            indexes,
            stale: BTreeSet::new(),
            open: true,
        };
        let names: Vec<String> = state.store.collections().into_iter().map(|c| c.name).collect();
        for name in names {
            let report = state.check(&name)?;
            if report.needs_rebuild() {
                warn!(
                    collection = %name,
                    dangling = report.dangling_vectors.len(),
                    dimension_mismatch = report.dimension_mismatch,
                    "index out of sync; rebuild required"
                );
                state.stale.insert(name);
            }
        }

        info!(
            dir = %data_dir.display(),
            collections = state.store.collections().len(),
            "search engine opened"
        );
        Ok(Self {
            data_dir: Some(data_dir),
            default_embedder: embedder,
            embedders: SyncRwLock::new(HashMap::new()),
            state: RwLock::new(state),
        })
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Use a dedicated embedder for one collection
    pub fn set_collection_embedder(&self, collection: impl Into<String>, embedder: Arc<dyn Embedder>) {
        self.embedders.write().insert(collection.into(), embedder);
    }

    pub fn embedder_for(&self, collection: &str) -> Arc<dyn Embedder> {
        self.embedders
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_else(|| self.default_embedder.clone())
    }

    pub async fn is_open(&self) -> bool {
        self.state.read().await.open
    }

    /// Create or update a collection. Changing the model or dimensionality
    /// drops every vector of the existing index.
    pub async fn upsert_collection(
        &self,
        name: &str,
        description: &str,
        embedding_model: &str,
        dimensions: usize,
    ) -> SearchResult<CollectionInfo> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        state.ensure_open()?;

        let info = CollectionInfo {
            name: name.to_string(),
            description: description.to_string(),
            embedding_model: embedding_model.to_string(),
            dimensions,
            created_at: Utc::now(),
        };
        let changed = state.store.upsert_collection(info);
        match state.indexes.get_mut(name) {
            Some(index) if changed => {
                index.reset(embedding_model, dimensions);
                state.stale.remove(name);
                info!(collection = %name, dimensions, "embedding configuration changed; index invalidated");
            }
            Some(_) => {}
            None => {
                state
                    .indexes
                    .insert(name.to_string(), VectorIndex::new(name, embedding_model, dimensions));
                debug!(collection = %name, dimensions, "collection created");
            }
        }

        self.persist(state, Some(name)).await?;
        state.info(name).cloned()
    }

    pub async fn collection(&self, name: &str) -> Option<CollectionInfo> {
        self.state.read().await.store.collection(name).cloned()
    }

    pub async fn collections(&self) -> Vec<CollectionInfo> {
        self.state.read().await.store.collections()
    }

    pub async fn document_count(&self, collection: &str) -> SearchResult<usize> {
        let state = self.state.read().await;
        state.ensure_open()?;
        state.store.len(collection)
    }

    pub async fn vector_count(&self, collection: &str) -> SearchResult<usize> {
        let state = self.state.read().await;
        state.ensure_open()?;
        Ok(state.index(collection)?.len())
    }

    /// Ids of every document in a collection, in id order
    pub async fn document_ids(&self, collection: &str) -> SearchResult<Vec<String>> {
        let state = self.state.read().await;
        state.info(collection)?;
        Ok(state
            .store
            .documents(collection)?
            .into_iter()
            .map(|document| document.id.clone())
            .collect())
    }

    pub async fn get_document(&self, collection: &str, id: &str) -> SearchResult<Option<Document>> {
        let state = self.state.read().await;
        state.ensure_open()?;
        Ok(state.store.get(collection, id)?.cloned())
    }

    pub async fn has_vector(&self, collection: &str, id: &str) -> SearchResult<bool> {
        let state = self.state.read().await;
        state.ensure_open()?;
        Ok(state.index(collection)?.contains(id))
    }

    /// Insert or update documents by id. Unchanged content is neither
    /// re-stored nor re-embedded. An unreachable embedder leaves the new
    /// documents without vectors; a dimension mismatch fails the whole call.
    pub async fn insert_docs(&self, collection: &str, documents: Vec<Document>) -> SearchResult<InsertReport> {
        // last occurrence of an id within one batch wins
        let mut batch: BTreeMap<String, Document> = BTreeMap::new();
        for document in documents {
            batch.insert(document.id.clone(), document);
        }

        let to_embed: Vec<String> = {
            let state = self.state.read().await;
            state.info(collection)?;
            let index = state.index(collection)?;
            batch
                .values()
                .filter(|document| {
                    let same_content = state
                        .store
                        .get(collection, &document.id)
                        .ok()
                        .flatten()
                        .is_some_and(|existing| existing.content_hash == document.content_hash);
                    !(same_content && index.contains(&document.id))
                })
                .map(|document| document.id.clone())
                .collect()
        };

        let embedder = self.embedder_for(collection);
        let texts: Vec<String> = to_embed
            .iter()
            .filter_map(|id| batch.get(id).map(|document| document.text.clone()))
            .collect();
        let vectors: Option<HashMap<String, Vec<f32>>> = if texts.is_empty() {
            Some(HashMap::new())
        } else {
            match embedder.embed_batch(&texts).await {
                Ok(vectors) => Some(to_embed.iter().cloned().zip(vectors).collect()),
                Err(err) if err.is_config_error() => return Err(err),
                Err(err) => {
                    warn!(collection = %collection, error = %err, "embedding failed; storing documents without vectors");
                    None
                }
            }
        };

        let mut state = self.state.write().await;
        state.info(collection)?;
        if let Some(vectors) = &vectors {
            let index = state.index(collection)?;
            for vector in vectors.values() {
                index.check_dimensions(vector.len())?;
            }
        }

        let mut report = InsertReport::default();
        for (id, document) in batch {
            let outcome = state.store.upsert(collection, document)?;
            match outcome {
                Upsert::Inserted => report.inserted += 1,
                Upsert::Updated => report.updated += 1,
                Upsert::Unchanged => report.unchanged += 1,
            }

            let vector = vectors.as_ref().and_then(|vectors| vectors.get(&id)).cloned();
            let index = state.index_mut(collection)?;
            match vector {
                Some(vector) => {
                    index.insert(id, vector)?;
                    report.embedded += 1;
                }
                None if !index.contains(&id) || outcome == Upsert::Updated => {
                    // a vector of the previous text must not survive an update
                    index.remove(&id);
                    report.missing_vectors += 1;
                }
                None => {}
            }
        }

        debug!(
            collection = %collection,
            inserted = report.inserted,
            updated = report.updated,
            unchanged = report.unchanged,
            "documents inserted"
        );
        self.persist(&state, Some(collection)).await?;
        Ok(report)
    }

    /// Remove documents together with their vectors
    pub async fn delete_docs(&self, collection: &str, ids: &[String]) -> SearchResult<usize> {
        let mut state = self.state.write().await;
        state.info(collection)?;
        let mut removed = 0;
        for id in ids {
            if state.store.remove(collection, id)? {
                removed += 1;
            }
            state.index_mut(collection)?.remove(id);
        }
        self.persist(&state, Some(collection)).await?;
        Ok(removed)
    }

    pub async fn keyword_search(&self, collection: &str, query: &str, top_k: usize) -> SearchResult<Vec<SearchHit>> {
        let state = self.state.read().await;
        state.info(collection)?;
        let documents = state.store.documents(collection)?;
        let scorer = Bm25Scorer::new(&documents);
        Ok(scorer
            .rank(query)
            .into_iter()
            .take(top_k)
            .map(|(document, score)| SearchHit::from_document(document, score))
            .collect())
    }

    pub async fn embedding_search(&self, collection: &str, query: &str, top_k: usize) -> SearchResult<Vec<SearchHit>> {
        {
            let state = self.state.read().await;
            state.info(collection)?;
            state.ensure_in_sync(collection)?;
            if state.index(collection)?.is_empty() {
                return Ok(Vec::new());
            }
        }
        let vector = self.embedder_for(collection).embed(query).await?;
        self.embedding_search_with_vector(collection, &vector, top_k).await
    }

    /// Rank by cosine similarity to a precomputed query vector
    pub async fn embedding_search_with_vector(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> SearchResult<Vec<SearchHit>> {
        let state = self.state.read().await;
        state.info(collection)?;
        state.ensure_in_sync(collection)?;
        let index = state.index(collection)?;
        if index.is_empty() {
            return Ok(Vec::new());
        }

        let scored = index.search(vector, top_k)?;
        Ok(scored
            .into_iter()
            .filter_map(|(id, score)| {
                let document = state.store.get(collection, &id).ok().flatten()?;
                Some(SearchHit::from_document(document, f64::from(score)))
            })
            .collect())
    }

    pub async fn hybrid_search(
        &self,
        collection: &str,
        query: &str,
        top_k: usize,
        alpha: f64,
    ) -> SearchResult<Vec<SearchHit>> {
        check_alpha(alpha)?;
        let needs_vector = {
            let state = self.state.read().await;
            state.info(collection)?;
            alpha > 0.0 && !state.index(collection)?.is_empty()
        };
        let vector = if needs_vector {
            Some(self.embedder_for(collection).embed(query).await?)
        } else {
            None
        };
        self.fuse(collection, query, vector.as_deref(), top_k, alpha).await
    }

    /// Hybrid ranking with a precomputed query vector
    pub async fn hybrid_search_with_vector(
        &self,
        collection: &str,
        query: &str,
        vector: &[f32],
        top_k: usize,
        alpha: f64,
    ) -> SearchResult<Vec<SearchHit>> {
        check_alpha(alpha)?;
        self.fuse(collection, query, Some(vector), top_k, alpha).await
    }

    pub async fn search(
        &self,
        collection: &str,
        query: &str,
        method: SearchMethod,
        top_k: usize,
        alpha: f64,
    ) -> SearchResult<Vec<SearchHit>> {
        match method {
            SearchMethod::Keyword => self.keyword_search(collection, query, top_k).await,
            SearchMethod::Embedding => self.embedding_search(collection, query, top_k).await,
            SearchMethod::Hybrid => self.hybrid_search(collection, query, top_k, alpha).await,
        }
    }

    /// Rank documents by `alpha * embedding + (1 - alpha) * keyword`, both
    /// normalized to [0, 1]. With `alpha > 0` every document is ranked and
    /// those lacking a vector come after all that have one; with `alpha == 0`
    /// only keyword matches are returned.
    async fn fuse(
        &self,
        collection: &str,
        query: &str,
        vector: Option<&[f32]>,
        top_k: usize,
        alpha: f64,
    ) -> SearchResult<Vec<SearchHit>> {
        let state = self.state.read().await;
        state.info(collection)?;

        let mut similarity: HashMap<String, f64> = HashMap::new();
        if alpha > 0.0
            && let Some(vector) = vector
        {
            state.ensure_in_sync(collection)?;
            let index = state.index(collection)?;
            index.check_dimensions(vector.len())?;
            for (id, score) in index.score_all(vector)? {
                similarity.insert(id, (f64::from(score) + 1.0) / 2.0);
            }
        }

        let documents = state.store.documents(collection)?;
        let keyword = Bm25Scorer::new(&documents).score_all(query);
        let keyword_max = keyword
            .iter()
            .map(|(_, score)| *score)
            .fold(0.0f64, f64::max);

        let mut fused: Vec<(bool, f64, &Document)> = keyword
            .into_iter()
            // pure keyword ranking keeps only documents the query matches
            .filter(|(_, score)| alpha > 0.0 || *score > 0.0)
            .map(|(document, score)| {
                let keyword_score = if keyword_max > 0.0 { score / keyword_max } else { 0.0 };
                let embedding_score = similarity.get(&document.id).copied();
                let lacks_vector = alpha > 0.0 && embedding_score.is_none();
                let combined =
                    alpha * embedding_score.unwrap_or(0.0) + (1.0 - alpha) * keyword_score;
                (lacks_vector, combined, document)
            })
            .collect();

        fused.sort_by(|(lacks_a, a, doc_a), (lacks_b, b, doc_b)| {
            lacks_a
                .cmp(lacks_b)
                .then_with(|| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| doc_a.id.cmp(&doc_b.id))
        });

        Ok(fused
            .into_iter()
            .take(top_k)
            .map(|(_, score, document)| SearchHit::from_document(document, score))
            .collect())
    }

    /// Compare a collection's index against its documents. Dangling entries
    /// mark the collection stale until rebuilt.
    pub async fn verify(&self, collection: &str) -> SearchResult<ConsistencyReport> {
        let mut state = self.state.write().await;
        let report = state.check(collection)?;
        if report.needs_rebuild() {
            state.stale.insert(collection.to_string());
        } else {
            state.stale.remove(collection);
        }
        Ok(report)
    }

    pub async fn is_stale(&self, collection: &str) -> bool {
        self.state.read().await.stale.contains(collection)
    }

    /// Re-embed every document of a collection into a fresh index
    pub async fn rebuild_index(&self, collection: &str) -> SearchResult<usize> {
        let (ids, texts): (Vec<String>, Vec<String>) = {
            let state = self.state.read().await;
            state.info(collection)?;
            state
                .store
                .documents(collection)?
                .into_iter()
                .map(|document| (document.id.clone(), document.text.clone()))
                .unzip()
        };

        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder_for(collection).embed_batch(&texts).await?
        };

        let mut state = self.state.write().await;
        let info = state.info(collection)?.clone();
        let mut rebuilt = VectorIndex::new(collection, &info.embedding_model, info.dimensions);
        for (id, vector) in ids.into_iter().zip(vectors) {
            // documents deleted while embedding are skipped
            if state.store.contains(collection, &id) {
                rebuilt.insert(id, vector)?;
            }
        }
        let count = rebuilt.len();
        state.indexes.insert(collection.to_string(), rebuilt);
        state.stale.remove(collection);
        self.persist(&state, Some(collection)).await?;

        info!(collection = %collection, vectors = count, "index rebuilt");
        Ok(count)
    }

    /// Write all state to disk. No-op for in-memory engines.
    pub async fn flush(&self) -> SearchResult<()> {
        let state = self.state.read().await;
        state.ensure_open()?;
        self.persist(&state, None).await
    }

    /// Flush and refuse further operations
    pub async fn close(&self) -> SearchResult<()> {
        let mut state = self.state.write().await;
        if !state.open {
            return Ok(());
        }
        self.persist(&state, None).await?;
        state.open = false;
        debug!("search engine closed");
        Ok(())
    }

    /// Write the documents file plus the index of `only` (every index when
    /// `None`). Serialization happens under the caller's lock; the file I/O
    /// runs on the blocking pool.
    async fn persist(&self, state: &EngineState, only: Option<&str>) -> SearchResult<()> {
        let Some(dir) = &self.data_dir else {
            return Ok(());
        };
        let documents_path = dir.join(DOCUMENTS_FILE);
        let documents = to_json_bytes(&documents_path, &state.store)?;
        let mut writes = vec![(documents_path, documents)];

        let index_dir = dir.join(INDEX_DIR);
        for (name, index) in &state.indexes {
            if only.is_some_and(|collection| collection != name) {
                continue;
            }
            let path = index_dir.join(index_file_name(name));
            let bytes = to_json_bytes(&path, index)?;
            writes.push((path, bytes));
        }

        tokio::task::spawn_blocking(move || {
            writes
                .iter()
                .try_for_each(|(path, bytes)| write_atomic(path, bytes))
        })
        .await
        .map_err(|err| storage_error(dir, err))?
    }
}

fn check_alpha(alpha: f64) -> SearchResult<()> {
    if (0.0..=1.0).contains(&alpha) {
        Ok(())
    } else {
        Err(SearchError::InvalidAlpha(alpha))
    }
}

fn index_file_name(collection: &str) -> String {
    let safe: String = collection
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{safe}.json")
}

fn storage_error(path: &Path, message: impl std::fmt::Display) -> SearchError {
    SearchError::Storage {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

fn to_json_bytes<T: Serialize>(path: &Path, value: &T) -> SearchResult<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|err| storage_error(path, err))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> SearchResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|err| storage_error(parent, err))?;
    let mut file = NamedTempFile::new_in(parent).map_err(|err| storage_error(parent, err))?;
    file.write_all(bytes).map_err(|err| storage_error(path, err))?;
    file.persist(path).map_err(|err| storage_error(path, err.error))?;
    Ok(())
}

fn load_documents(path: &Path) -> SearchResult<DocumentStore> {
    if !path.exists() {
        return Ok(DocumentStore::new());
    }
    let content = std::fs::read_to_string(path).map_err(|err| storage_error(path, err))?;
    serde_json::from_str(&content).map_err(|err| storage_error(path, err))
}

fn load_indexes(dir: &Path) -> SearchResult<BTreeMap<String, VectorIndex>> {
    let mut indexes = BTreeMap::new();
    if !dir.exists() {
        return Ok(indexes);
    }
    let entries = std::fs::read_dir(dir).map_err(|err| storage_error(dir, err))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let content = std::fs::read_to_string(&path).map_err(|err| storage_error(&path, err))?;
        let index: VectorIndex =
            serde_json::from_str(&content).map_err(|err| storage_error(&path, err))?;
        indexes.insert(index.collection().to_string(), index);
    }
    Ok(indexes)
}
