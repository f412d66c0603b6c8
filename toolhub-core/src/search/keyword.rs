use std::collections::{HashMap, HashSet};

use crate::config::constants::search::{BM25_B, BM25_K1};

use super::Document;

/// Lowercased alphanumeric terms. Underscores and punctuation split terms.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// BM25 over a fixed set of documents
pub struct Bm25Scorer<'a> {
    documents: Vec<(&'a Document, HashMap<String, usize>, usize)>,
    document_frequency: HashMap<String, usize>,
    average_length: f64,
}

impl<'a> Bm25Scorer<'a> {
    pub fn new(documents: &[&'a Document]) -> Self {
        let mut document_frequency: HashMap<String, usize> = HashMap::new();
        let mut total_length = 0usize;
        let documents: Vec<_> = documents
            .iter()
            .map(|document| {
                let terms = tokenize(&document.text);
                let length = terms.len();
                total_length += length;
                let mut frequencies: HashMap<String, usize> = HashMap::new();
                for term in terms {
                    *frequencies.entry(term).or_default() += 1;
                }
                for term in frequencies.keys() {
                    *document_frequency.entry(term.clone()).or_default() += 1;
                }
                (*document, frequencies, length)
            })
            .collect();

        let average_length = if documents.is_empty() {
            0.0
        } else {
            total_length as f64 / documents.len() as f64
        };

        Self {
            documents,
            document_frequency,
            average_length,
        }
    }

    fn idf(&self, term: &str) -> f64 {
        let n = self.documents.len() as f64;
        let df = self.document_frequency.get(term).copied().unwrap_or(0) as f64;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// Score of every document for `query`, including zeros, in input order
    pub fn score_all(&self, query: &str) -> Vec<(&'a Document, f64)> {
        let mut seen = HashSet::new();
        let terms: Vec<String> = tokenize(query)
            .into_iter()
            .filter(|term| seen.insert(term.clone()))
            .collect();

        self.documents
            .iter()
            .map(|(document, frequencies, length)| {
                let length_ratio = if self.average_length > 0.0 {
                    *length as f64 / self.average_length
                } else {
                    0.0
                };
                let score = terms
                    .iter()
                    .filter_map(|term| {
                        let tf = *frequencies.get(term)? as f64;
                        let denominator = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * length_ratio);
                        Some(self.idf(term) * tf * (BM25_K1 + 1.0) / denominator)
                    })
                    .sum::<f64>();
                (*document, score)
            })
            .collect()
    }

    /// Matching documents only, highest score first, ties by id
    pub fn rank(&self, query: &str) -> Vec<(&'a Document, f64)> {
        let mut ranked: Vec<_> = self
            .score_all(query)
            .into_iter()
            .filter(|(_, score)| *score > 0.0)
            .collect();
        ranked.sort_by(|(doc_a, a), (doc_b, b)| {
            b.partial_cmp(a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| doc_a.id.cmp(&doc_b.id))
        });
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_identifiers() {
        assert_eq!(tokenize("web_search: Find PAGES"), vec!["web", "search", "find", "pages"]);
    }

    #[test]
    fn ranks_matching_documents() {
        let docs = [
            Document::new("weather", "current weather forecast for a city"),
            Document::new("stocks", "stock price quotes"),
            Document::new("news", "news headlines and weather alerts"),
        ];
        let refs: Vec<&Document> = docs.iter().collect();
        let scorer = Bm25Scorer::new(&refs);

        let ranked = scorer.rank("weather forecast");
        let ids: Vec<&str> = ranked.iter().map(|(d, _)| d.id.as_str()).collect();
        assert_eq!(ids, vec!["weather", "news"]);
        assert!(scorer.rank("nothing matches").is_empty());
    }

    #[test]
    fn ties_break_by_id() {
        let docs = [Document::new("b", "same text"), Document::new("a", "same text")];
        let refs: Vec<&Document> = docs.iter().collect();
        let ranked = Bm25Scorer::new(&refs).rank("same");
        assert_eq!(ranked[0].0.id, "a");
        assert_eq!(ranked[1].0.id, "b");
    }
}
