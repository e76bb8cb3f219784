//! In-process document index, the last search layer.
//!
//! Seeded by the initial import and kept warm by the indexer consumer, so it
//! can answer when both Solr and the relational store are down.

use crate::document::{SearchDocument, SearchRequest};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;

/// Map of id to document behind a reader/writer lock.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    documents: RwLock<HashMap<String, SearchDocument>>,
}

impl MemoryIndex {
    /// Empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace one document.
    pub async fn upsert(&self, document: SearchDocument) {
        self.documents.write().await.insert(document.id.clone(), document);
    }

    /// Insert or replace many documents under one lock.
    pub async fn upsert_many(&self, documents: impl IntoIterator<Item = SearchDocument>) {
        let mut index = self.documents.write().await;
        for document in documents {
            index.insert(document.id.clone(), document);
        }
    }

    /// Remove a document, returning it if it was present.
    pub async fn remove(&self, id: &str) -> Option<SearchDocument> {
        self.documents.write().await.remove(id)
    }

    /// Look up a document.
    pub async fn get(&self, id: &str) -> Option<SearchDocument> {
        self.documents.read().await.get(id).cloned()
    }

    /// Overwrite the seats left on an indexed document; `false` if absent.
    pub async fn set_seats(&self, id: &str, seats: i64) -> bool {
        self.documents
            .write()
            .await
            .get_mut(id)
            .map(|document| document.cupo_disponible = Some(seats))
            .is_some()
    }

    /// Matching documents for one page plus the total match count.
    ///
    /// Results are ordered by title then id so pages are stable.
    pub async fn search(&self, request: &SearchRequest) -> (Vec<SearchDocument>, i64) {
        let mut matched: Vec<SearchDocument> = self
            .documents
            .read()
            .await
            .values()
            .filter(|document| document.matches(request))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.titulo.cmp(&b.titulo).then_with(|| a.id.cmp(&b.id)));

        let total = i64::try_from(matched.len()).unwrap_or(i64::MAX);
        let start = usize::try_from(request.offset()).unwrap_or(usize::MAX);
        let size = usize::try_from(request.limit()).unwrap_or(usize::MAX);
        let page = matched.into_iter().skip(start).take(size).collect();
        (page, total)
    }

    /// Number of documents.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Whether the index holds nothing.
    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Document counts per type.
    pub async fn counts_by_type(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for document in self.documents.read().await.values() {
            *counts.entry(document.kind.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Non-empty categories, sorted and deduplicated.
    pub async fn categories(&self) -> Vec<String> {
        self.documents
            .read()
            .await
            .values()
            .filter(|document| !document.categoria.is_empty())
            .map(|document| document.categoria.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
