//! In-memory mail index: lexical BM25 postings plus brute-force cosine
//! similarity over document embeddings.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use bm25::{Document, Language, SearchEngine, SearchEngineBuilder};
use serde::Serialize;
use sift_vector::cosine_similarity;
use tracing::instrument;

use crate::document::SearchDocument;
use crate::error::IndexError;

/// Hits are ranked by `TEXT_WEIGHT * normalized_bm25 + VECTOR_WEIGHT * similarity`.
pub const TEXT_WEIGHT: f32 = 0.5;
pub const VECTOR_WEIGHT: f32 = 0.5;

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub document: SearchDocument,
}

/// Outcome of a query. `count` is the number of matches before truncation.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub count: usize,
    pub hits: Vec<SearchHit>,
    pub elapsed: Duration,
}

impl SearchResults {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

pub struct MailIndex {
    dimensions: usize,
    /// Identity of the embedder that produced the stored vectors.
    embedder: Option<String>,
    /// Insertion slot -> document. Slot order is insertion order.
    documents: BTreeMap<u64, SearchDocument>,
    slots: HashMap<String, u64>,
    next_slot: u64,
    keyword: Option<SearchEngine<u64>>,
}

impl MailIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            embedder: None,
            documents: BTreeMap::new(),
            slots: HashMap::new(),
            next_slot: 0,
            keyword: None,
        }
    }

    pub fn with_embedder(mut self, identity: impl Into<String>) -> Self {
        self.embedder = Some(identity.into());
        self
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn embedder(&self) -> Option<&str> {
        self.embedder.as_deref()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&SearchDocument> {
        self.slots.get(id).and_then(|slot| self.documents.get(slot))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    /// Documents in insertion order.
    pub fn documents(&self) -> impl Iterator<Item = &SearchDocument> {
        self.documents.values()
    }

    pub fn validate(&self, document: &SearchDocument) -> Result<(), IndexError> {
        if document.embeddings.len() != self.dimensions {
            return Err(IndexError::Dimension {
                id: document.id.clone(),
                expected: self.dimensions,
                actual: document.embeddings.len(),
            });
        }
        Ok(())
    }

    pub fn insert(&mut self, document: SearchDocument) -> Result<(), IndexError> {
        self.insert_many(vec![document])
    }

    /// Insert or replace documents by id. Nothing is applied if any document
    /// fails validation.
    pub fn insert_many(&mut self, documents: Vec<SearchDocument>) -> Result<(), IndexError> {
        for document in &documents {
            self.validate(document)?;
        }
        for document in documents {
            self.put(document);
        }
        self.rebuild_keyword();
        Ok(())
    }

    /// The document list this index would hold after `incoming` is applied,
    /// in insertion order. The index itself is not modified.
    pub fn merged_with<'a>(&'a self, incoming: &'a [SearchDocument]) -> Vec<&'a SearchDocument> {
        let mut replacements: HashMap<&str, &SearchDocument> = HashMap::new();
        let mut appended: Vec<&SearchDocument> = Vec::new();
        for document in incoming {
            if self.contains(&document.id) {
                replacements.insert(document.id.as_str(), document);
            } else if let Some(pos) = appended.iter().position(|d| d.id == document.id) {
                appended[pos] = document;
            } else {
                appended.push(document);
            }
        }

        self.documents
            .values()
            .map(|existing| {
                replacements
                    .get(existing.id.as_str())
                    .copied()
                    .unwrap_or(existing)
            })
            .chain(appended)
            .collect()
    }

    fn put(&mut self, document: SearchDocument) {
        let slot = match self.slots.get(&document.id) {
            Some(slot) => *slot,
            None => {
                let slot = self.next_slot;
                self.next_slot += 1;
                self.slots.insert(document.id.clone(), slot);
                slot
            }
        };
        self.documents.insert(slot, document);
    }

    fn rebuild_keyword(&mut self) {
        if self.documents.is_empty() {
            self.keyword = None;
            return;
        }
        let corpus: Vec<Document<u64>> = self
            .documents
            .iter()
            .map(|(slot, doc)| Document {
                id: *slot,
                contents: doc.searchable_text(),
            })
            .collect();
        self.keyword =
            Some(SearchEngineBuilder::<u64>::with_documents(Language::English, corpus).build());
    }

    /// BM25 scores for every document matching `term`, best first.
    fn keyword_scores(&self, term: &str) -> Vec<(u64, f32)> {
        match &self.keyword {
            Some(engine) if !term.trim().is_empty() => engine
                .search(term, self.documents.len())
                .into_iter()
                .map(|result| (result.document.id, result.score))
                .filter(|(_, score)| *score > 0.0)
                .collect(),
            _ => Vec::new(),
        }
    }

    fn hit(&self, slot: u64, score: f32) -> Option<SearchHit> {
        self.documents.get(&slot).map(|doc| SearchHit {
            id: doc.id.clone(),
            score,
            document: doc.clone(),
        })
    }

    /// Lexical-only query. A blank term lists the most recent documents.
    #[instrument(skip(self), fields(docs = self.documents.len()))]
    pub fn text_search(&self, term: &str, limit: usize) -> SearchResults {
        let started = Instant::now();

        let mut scored: Vec<(u64, f32)> = if term.trim().is_empty() {
            self.documents.keys().map(|slot| (*slot, 0.0)).collect()
        } else {
            self.keyword_scores(term)
        };
        self.rank(&mut scored);

        let count = scored.len();
        let hits = scored
            .into_iter()
            .take(limit)
            .filter_map(|(slot, score)| self.hit(slot, score))
            .collect();
        SearchResults {
            count,
            hits,
            elapsed: started.elapsed(),
        }
    }

    /// Hybrid query: only documents whose embedding similarity to `embedding`
    /// reaches `min_similarity` are eligible; they are ranked by a weighted
    /// blend of max-normalized BM25 score for `term` and similarity.
    #[instrument(skip(self, embedding), fields(docs = self.documents.len()))]
    pub fn hybrid_search(
        &self,
        term: &str,
        embedding: &[f32],
        min_similarity: f32,
        limit: usize,
    ) -> SearchResults {
        let started = Instant::now();

        let keyword: HashMap<u64, f32> = self.keyword_scores(term).into_iter().collect();
        let max_keyword = keyword.values().copied().fold(0.0f32, f32::max);

        let mut scored: Vec<(u64, f32)> = self
            .documents
            .iter()
            .filter_map(|(slot, doc)| {
                let similarity = cosine_similarity(embedding, &doc.embeddings);
                if similarity.is_nan() || similarity < min_similarity {
                    return None;
                }
                let text = match keyword.get(slot) {
                    Some(score) if max_keyword > 0.0 => score / max_keyword,
                    _ => 0.0,
                };
                Some((*slot, TEXT_WEIGHT * text + VECTOR_WEIGHT * similarity))
            })
            .collect();
        self.rank(&mut scored);

        let count = scored.len();
        let hits = scored
            .into_iter()
            .take(limit)
            .filter_map(|(slot, score)| self.hit(slot, score))
            .collect();
        SearchResults {
            count,
            hits,
            elapsed: started.elapsed(),
        }
    }

    /// Score descending, then newest first, then insertion order.
    fn rank(&self, scored: &mut [(u64, f32)]) {
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    let sent_a = self.documents.get(&a.0).map(|d| d.sent_at);
                    let sent_b = self.documents.get(&b.0).map(|d| d.sent_at);
                    sent_b.cmp(&sent_a)
                })
                .then_with(|| a.0.cmp(&b.0))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const DIMS: usize = 4;

    fn doc(id: &str, title: &str, body: &str, embeddings: [f32; DIMS], day: u32) -> SearchDocument {
        SearchDocument {
            id: id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            raw_body: String::new(),
            from: "Alice <alice@example.com>".to_string(),
            to: vec!["bob@example.com".to_string()],
            sent_at: Utc.with_ymd_and_hms(2024, 5, day, 9, 0, 0).unwrap(),
            embeddings: embeddings.to_vec(),
            thread_id: format!("thread-{id}"),
        }
    }

    fn sample() -> MailIndex {
        let mut index = MailIndex::new(DIMS);
        index
            .insert_many(vec![
                doc("m1", "Quarterly invoice", "payment due friday", [1.0, 0.0, 0.0, 0.0], 1),
                doc("m2", "Team offsite", "agenda for the offsite", [0.0, 1.0, 0.0, 0.0], 2),
                doc("m3", "Invoice reminder", "second invoice notice", [0.9, 0.1, 0.0, 0.0], 3),
            ])
            .unwrap();
        index
    }

    #[test]
    fn test_insert_rejects_wrong_dimensions() {
        let mut index = MailIndex::new(DIMS);
        let mut bad = doc("m1", "a", "b", [1.0, 0.0, 0.0, 0.0], 1);
        bad.embeddings.pop();
        let err = index.insert(bad).unwrap_err();
        assert!(matches!(err, IndexError::Dimension { expected: 4, actual: 3, .. }));
        assert!(index.is_empty());
    }

    #[test]
    fn test_insert_many_is_all_or_nothing() {
        let mut index = MailIndex::new(DIMS);
        let good = doc("m1", "a", "b", [1.0, 0.0, 0.0, 0.0], 1);
        let mut bad = doc("m2", "a", "b", [1.0, 0.0, 0.0, 0.0], 1);
        bad.embeddings.clear();
        assert!(index.insert_many(vec![good, bad]).is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn test_reinsert_replaces_in_place() {
        let mut index = sample();
        index
            .insert(doc("m1", "Quarterly invoice (paid)", "paid", [1.0, 0.0, 0.0, 0.0], 1))
            .unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.get("m1").unwrap().title, "Quarterly invoice (paid)");
        let order: Vec<&str> = index.documents().map(|d| d.id.as_str()).collect();
        assert_eq!(order, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn test_merged_with_preserves_order() {
        let index = sample();
        let incoming = vec![
            doc("m4", "new", "new", [0.0, 0.0, 1.0, 0.0], 4),
            doc("m2", "Team offsite v2", "moved", [0.0, 1.0, 0.0, 0.0], 2),
            doc("m4", "newer", "newer", [0.0, 0.0, 1.0, 0.0], 4),
        ];
        let merged = index.merged_with(&incoming);
        let ids: Vec<&str> = merged.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3", "m4"]);
        assert_eq!(merged[1].title, "Team offsite v2");
        assert_eq!(merged[3].title, "newer");
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_text_search_matches_terms() {
        let index = sample();
        let results = index.text_search("invoice", 10);
        assert_eq!(results.count, 2);
        let ids: Vec<&str> = results.hits.iter().map(|h| h.id.as_str()).collect();
        assert!(ids.contains(&"m1"));
        assert!(ids.contains(&"m3"));
        assert!(results.hits.iter().all(|h| h.score > 0.0));
    }

    #[test]
    fn test_text_search_no_match_is_empty() {
        let index = sample();
        let results = index.text_search("kangaroo", 10);
        assert_eq!(results.count, 0);
        assert!(results.is_empty());
    }

    #[test]
    fn test_blank_term_lists_newest_first() {
        let index = sample();
        let results = index.text_search("  ", 2);
        assert_eq!(results.count, 3);
        let ids: Vec<&str> = results.hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m2"]);
    }

    #[test]
    fn test_hybrid_applies_similarity_floor() {
        let index = sample();
        let query = [1.0, 0.0, 0.0, 0.0];
        let results = index.hybrid_search("offsite", &query, 0.8, 10);
        // m2 matches the term but is orthogonal to the query vector.
        let ids: Vec<&str> = results.hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(!ids.contains(&"m2"));
        for hit in &results.hits {
            assert!(cosine_similarity(&query, &hit.document.embeddings) >= 0.8);
        }
    }

    #[test]
    fn test_hybrid_text_match_breaks_vector_tie() {
        let mut index = MailIndex::new(DIMS);
        index
            .insert_many(vec![
                doc("a", "Lunch plans", "sandwiches", [1.0, 0.0, 0.0, 0.0], 1),
                doc("b", "Invoice", "invoice overdue", [1.0, 0.0, 0.0, 0.0], 1),
            ])
            .unwrap();
        let results = index.hybrid_search("invoice", &[1.0, 0.0, 0.0, 0.0], 0.8, 10);
        assert_eq!(results.hits[0].id, "b");
        assert!(results.hits[0].score > results.hits[1].score);
    }

    #[test]
    fn test_hybrid_respects_limit() {
        let index = sample();
        let results = index.hybrid_search("invoice", &[1.0, 0.0, 0.0, 0.0], 0.8, 1);
        assert_eq!(results.count, 2);
        assert_eq!(results.hits.len(), 1);
    }
}
