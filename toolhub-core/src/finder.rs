//! Natural-language tool discovery over the catalog
//!
//! Each descriptor's name and description is indexed as a [`Document`] in a
//! dedicated collection. [`ToolFinder::find`] runs a hybrid search there and
//! degrades to keyword ranking when the embedding provider is unavailable.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, ToolDescriptor};
use crate::config::FinderConfig;
use crate::config::constants::finder::COLLECTION_DESCRIPTION;
use crate::search::{Document, InsertReport, SearchEngine, SearchError, SearchHit, SearchMethod, SearchResult};

/// One discovered tool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolMatch {
    pub name: String,
    pub score: f64,
    pub description: String,
    pub category: Option<String>,
    /// Ranking actually used; `Keyword` after an embedding fallback
    pub method: SearchMethod,
}

impl ToolMatch {
    fn from_hit(hit: SearchHit, method: SearchMethod) -> Self {
        let field = |key: &str| {
            hit.metadata
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Self {
            description: field("description").unwrap_or_default(),
            category: field("category"),
            name: hit.id,
            score: hit.score,
            method,
        }
    }
}

/// External re-ranker, typically an LLM asked which candidates fit the query
#[async_trait]
pub trait RelevanceJudge: Send + Sync {
    /// Tool names in preferred order. Names not returned keep their fused
    /// order after the judged ones; unknown names are ignored.
    async fn rerank(&self, query: &str, candidates: &[ToolMatch]) -> anyhow::Result<Vec<String>>;
}

/// Result of looking tools up by exact name
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExactNameLookup {
    pub found: Vec<ToolDescriptor>,
    pub missing: Vec<String>,
}

pub struct ToolFinder {
    engine: Arc<SearchEngine>,
    collection: String,
    default_limit: usize,
    alpha: f64,
    judge: Option<Arc<dyn RelevanceJudge>>,
}

impl ToolFinder {
    pub fn new(engine: Arc<SearchEngine>, config: &FinderConfig, alpha: f64) -> Self {
        Self {
            engine,
            collection: config.collection.clone(),
            default_limit: config.default_limit,
            alpha,
            judge: None,
        }
    }

    pub fn with_judge(mut self, judge: Arc<dyn RelevanceJudge>) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn engine(&self) -> &Arc<SearchEngine> {
        &self.engine
    }

    /// Sync the finder collection with `catalog`: new and changed descriptors
    /// are (re-)indexed, descriptors no longer in the catalog are removed.
    pub async fn index_catalog(&self, catalog: &Catalog) -> SearchResult<InsertReport> {
        let embedder = self.engine.embedder_for(&self.collection);
        self.engine
            .upsert_collection(
                &self.collection,
                COLLECTION_DESCRIPTION,
                embedder.model(),
                embedder.dimensions(),
            )
            .await?;

        let documents: Vec<Document> = catalog.iter().map(descriptor_document).collect();
        let keep: HashSet<&str> = documents.iter().map(|d| d.id.as_str()).collect();

        let indexed = self.engine.document_ids(&self.collection).await?;
        let stale: Vec<String> = indexed
            .into_iter()
            .filter(|id| !keep.contains(id.as_str()))
            .collect();
        if !stale.is_empty() {
            let removed = self.engine.delete_docs(&self.collection, &stale).await?;
            debug!(collection = %self.collection, removed, "removed tools no longer in catalog");
        }

        let report = self.engine.insert_docs(&self.collection, documents).await?;
        info!(
            collection = %self.collection,
            tools = catalog.len(),
            inserted = report.inserted,
            updated = report.updated,
            "tool catalog indexed"
        );
        Ok(report)
    }

    /// Tools relevant to `query`, best first
    pub async fn find(&self, query: &str, limit: Option<usize>) -> SearchResult<Vec<ToolMatch>> {
        let limit = limit.unwrap_or(self.default_limit);
        let matches = match self
            .engine
            .hybrid_search(&self.collection, query, limit, self.alpha)
            .await
        {
            Ok(hits) => to_matches(hits, SearchMethod::Hybrid),
            Err(err) if degrades_to_keyword(&err) => {
                warn!(collection = %self.collection, error = %err, "embedding unavailable; using keyword search");
                let hits = self.engine.keyword_search(&self.collection, query, limit).await?;
                to_matches(hits, SearchMethod::Keyword)
            }
            Err(err) => return Err(err),
        };

        Ok(match &self.judge {
            Some(judge) => self.rerank(judge.as_ref(), query, matches).await,
            None => matches,
        })
    }

    async fn rerank(&self, judge: &dyn RelevanceJudge, query: &str, matches: Vec<ToolMatch>) -> Vec<ToolMatch> {
        if matches.len() < 2 {
            return matches;
        }
        match judge.rerank(query, &matches).await {
            Ok(order) => apply_order(matches, &order),
            Err(err) => {
                warn!(error = %err, "relevance judge failed; keeping fused order");
                matches
            }
        }
    }

    /// Descriptors for `names` in the order given, plus names the catalog
    /// does not know
    pub fn find_by_exact_names(&self, catalog: &Catalog, names: &[String]) -> ExactNameLookup {
        let mut seen = HashSet::new();
        let mut lookup = ExactNameLookup::default();
        for name in names {
            let name = name.trim();
            if name.is_empty() || !seen.insert(name.to_string()) {
                continue;
            }
            match catalog.get(name) {
                Some(descriptor) => lookup.found.push(descriptor.clone()),
                None => lookup.missing.push(name.to_string()),
            }
        }
        lookup
    }
}

fn degrades_to_keyword(err: &SearchError) -> bool {
    matches!(
        err,
        SearchError::Embedding(_) | SearchError::IndexOutOfSync { .. }
    )
}

fn descriptor_document(descriptor: &ToolDescriptor) -> Document {
    let mut metadata = Map::new();
    metadata.insert("description".into(), Value::String(descriptor.description.clone()));
    metadata.insert("type".into(), Value::String(descriptor.implementation_type.clone()));
    if let Some(category) = &descriptor.category {
        metadata.insert("category".into(), Value::String(category.clone()));
    }
    Document::new(descriptor.name.clone(), descriptor.search_text()).with_metadata(metadata)
}

fn to_matches(hits: Vec<SearchHit>, method: SearchMethod) -> Vec<ToolMatch> {
    hits.into_iter()
        .map(|hit| ToolMatch::from_hit(hit, method))
        .collect()
}

fn apply_order(mut matches: Vec<ToolMatch>, order: &[String]) -> Vec<ToolMatch> {
    let mut ordered = Vec::with_capacity(matches.len());
    for name in order {
        if let Some(position) = matches.iter().position(|m| &m.name == name) {
            ordered.push(matches.remove(position));
        }
    }
    ordered.extend(matches);
    ordered
}
