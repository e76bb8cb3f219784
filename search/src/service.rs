//! Search read path and index maintenance.
//!
//! A search walks three layers and answers from the first that works:
//!
//! 1. the primary backend (Solr), unless the service is degraded
//! 2. the relational fallback
//! 3. the in-memory index, which cannot fail
//!
//! The first primary failure flips the service into degraded mode. While
//! degraded, searches go straight to the fallback; at most once per re-probe
//! interval a ping is attempted and, if it succeeds, the primary is used
//! again.
//!
//! Writes always land in the in-memory index and are forwarded to the primary
//! best effort, so the last layer stays warm whatever happens upstream.

use crate::backend::{ActivitySource, SearchBackend};
use crate::document::{IndexStats, SearchDocument, SearchRequest, SearchResponse};
use crate::error::SearchError;
use crate::index::MemoryIndex;
use async_trait::async_trait;
use gym_runtime::metrics::SEARCH_SERVED;
use gym_web::{ComponentHealth, HealthCheck};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Default interval between re-probes of a degraded primary.
pub const DEFAULT_REPROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Layer that answered a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Primary full-text backend.
    Solr,
    /// Relational fallback.
    Sql,
    /// In-memory index.
    Memory,
}

impl Source {
    /// Header and metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Solr => "solr",
            Self::Sql => "sql",
            Self::Memory => "memory",
        }
    }
}

/// A page of results and where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Served {
    /// Answering layer.
    pub source: Source,
    /// The page.
    pub response: SearchResponse,
}

/// Layered search over a primary backend, a relational fallback and an
/// in-memory index.
pub struct SearchService {
    backend: Option<Arc<dyn SearchBackend>>,
    source: Option<Arc<dyn ActivitySource>>,
    index: Arc<MemoryIndex>,
    degraded: AtomicBool,
    last_probe: Mutex<Option<Instant>>,
    reprobe_interval: Duration,
}

impl SearchService {
    /// Service answering from `index` only; add layers with the `with_*`
    /// builders.
    #[must_use]
    pub fn new(index: Arc<MemoryIndex>) -> Self {
        Self {
            backend: None,
            source: None,
            index,
            degraded: AtomicBool::new(false),
            last_probe: Mutex::new(None),
            reprobe_interval: DEFAULT_REPROBE_INTERVAL,
        }
    }

    /// Use `backend` as the primary layer.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn SearchBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use `source` as the relational fallback and the reindex source.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn ActivitySource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Minimum time between pings of a degraded primary.
    #[must_use]
    pub const fn with_reprobe_interval(mut self, interval: Duration) -> Self {
        self.reprobe_interval = interval;
        self
    }

    /// Whether searches currently skip the primary.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// The in-memory index.
    #[must_use]
    pub fn index(&self) -> &Arc<MemoryIndex> {
        &self.index
    }

    async fn mark_degraded(&self, error: &SearchError) {
        *self.last_probe.lock().await = Some(Instant::now());
        if !self.degraded.swap(true, Ordering::SeqCst) {
            tracing::warn!(error = %error, "Search backend failed, switching to fallback");
        }
    }

    /// The primary, if it should be tried for this call.
    async fn primary(&self) -> Option<&Arc<dyn SearchBackend>> {
        let backend = self.backend.as_ref()?;
        if !self.is_degraded() {
            return Some(backend);
        }

        {
            let mut last = self.last_probe.lock().await;
            if last.is_some_and(|at| at.elapsed() < self.reprobe_interval) {
                return None;
            }
            *last = Some(Instant::now());
        }

        match backend.ping().await {
            Ok(()) => {
                self.degraded.store(false, Ordering::SeqCst);
                tracing::info!("Search backend recovered");
                Some(backend)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Search backend still unavailable");
                None
            }
        }
    }

    /// Run `request` through the layers.
    pub async fn search(&self, request: SearchRequest) -> Served {
        let request = request.normalized();

        let (source, (results, total)) = 'served: {
            if let Some(backend) = self.primary().await {
                match backend.search(&request).await {
                    Ok(page) => break 'served (Source::Solr, page),
                    Err(e) => self.mark_degraded(&e).await,
                }
            }
            if let Some(fallback) = &self.source {
                match fallback.search(&request).await {
                    Ok(page) => break 'served (Source::Sql, page),
                    Err(e) => tracing::warn!(error = %e, "Fallback search failed, using memory index"),
                }
            }
            (Source::Memory, self.index.search(&request).await)
        };

        metrics::counter!(SEARCH_SERVED, "source" => source.as_str()).increment(1);
        tracing::debug!(query = %request.query, source = source.as_str(), total, "Search served");
        Served {
            source,
            response: SearchResponse::new(results, total, &request),
        }
    }

    /// One document by id: the in-memory index, then the relational store.
    ///
    /// # Errors
    ///
    /// [`SearchError::NotFound`] if no layer knows it, or the store's error.
    pub async fn get_document(&self, id: &str) -> Result<SearchDocument, SearchError> {
        if let Some(document) = self.index.get(id).await {
            return Ok(document);
        }
        if let Some(source) = &self.source {
            if let Some(document) = source.activity(id).await? {
                self.index.upsert(document.clone()).await;
                return Ok(document);
            }
        }
        Err(SearchError::NotFound(id.to_string()))
    }

    /// Index one document.
    ///
    /// # Errors
    ///
    /// [`SearchError::Validation`] without an id or type.
    pub async fn index_document(&self, document: SearchDocument) -> Result<(), SearchError> {
        self.index_documents(vec![document]).await.map(|_| ())
    }

    /// Index a batch; returns how many were indexed.
    ///
    /// Primary failures are logged and degrade the service; the in-memory
    /// index is always updated.
    ///
    /// # Errors
    ///
    /// [`SearchError::Validation`] if any document lacks an id or type. Nothing
    /// is indexed then.
    pub async fn index_documents(&self, documents: Vec<SearchDocument>) -> Result<usize, SearchError> {
        if let Some(bad) = documents.iter().find(|d| d.id.is_empty() || d.kind.is_empty()) {
            return Err(SearchError::Validation(format!(
                "document needs an id and a type (id = {:?}, type = {:?})",
                bad.id, bad.kind
            )));
        }
        if documents.is_empty() {
            return Ok(0);
        }

        if let Some(backend) = &self.backend {
            if let Err(e) = backend.index(&documents).await {
                self.mark_degraded(&e).await;
            }
        }
        let count = documents.len();
        self.index.upsert_many(documents).await;
        Ok(count)
    }

    /// Remove a document, returning it if the in-memory index had it.
    pub async fn delete_document(&self, id: &str) -> Option<SearchDocument> {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.delete(id).await {
                tracing::warn!(id, error = %e, "Failed to delete document from search backend");
            }
        }
        self.index.remove(id).await
    }

    /// Recompute the seats left on an activity from the relational store and
    /// push them to every layer. `false` if the store does not know the
    /// activity (or there is no store).
    ///
    /// # Errors
    ///
    /// The store's error, so the caller can retry.
    pub async fn refresh_seats(&self, activity_id: &str) -> Result<bool, SearchError> {
        let Some(source) = &self.source else {
            return Ok(false);
        };
        let Some(current) = source.activity(activity_id).await? else {
            return Ok(false);
        };
        let seats = current.cupo_disponible.unwrap_or(0);

        if let Some(backend) = &self.backend {
            if let Err(e) = backend.set_seats(activity_id, seats).await {
                tracing::warn!(activity_id, error = %e, "Failed to update seats in search backend");
            }
        }
        if !self.index.set_seats(activity_id, seats).await {
            self.index.upsert(current).await;
        }
        tracing::debug!(activity_id, seats, "Seats refreshed");
        Ok(true)
    }

    /// Index an activity from the relational store, or from `payload` when
    /// the store cannot provide it.
    ///
    /// # Errors
    ///
    /// [`SearchError::Validation`] if the resulting document lacks an id.
    pub async fn reindex_activity(&self, payload: SearchDocument) -> Result<(), SearchError> {
        let document = match &self.source {
            Some(source) => match source.activity(&payload.id).await {
                Ok(Some(current)) => current,
                Ok(None) => payload,
                Err(e) => {
                    tracing::warn!(id = %payload.id, error = %e, "Activity store unavailable, indexing event payload");
                    payload
                }
            },
            None => payload,
        };
        self.index_document(document).await
    }

    /// Load every activity from the relational store into every layer.
    /// Failures are logged and never abort startup; returns how many
    /// documents were loaded.
    pub async fn initial_index(&self) -> usize {
        let Some(source) = &self.source else {
            return 0;
        };
        match source.activities().await {
            Ok(documents) => match self.index_documents(documents).await {
                Ok(count) => {
                    tracing::info!(count, degraded = self.is_degraded(), "Initial index complete");
                    count
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Initial index skipped invalid documents");
                    0
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Initial index failed, starting with an empty index");
                0
            }
        }
    }

    /// Document counts and degraded flag.
    pub async fn stats(&self) -> IndexStats {
        IndexStats {
            total_documents: self.index.len().await,
            documents_by_type: self.index.counts_by_type().await,
            degraded: self.is_degraded(),
        }
    }

    /// Sorted, deduplicated categories.
    pub async fn categories(&self) -> Vec<String> {
        self.index.categories().await
    }
}

/// Readiness reports the primary as degraded, never as down: the fallbacks
/// keep the service answering.
#[async_trait]
impl HealthCheck for SearchService {
    async fn check(&self) -> ComponentHealth {
        if self.backend.is_some() && self.is_degraded() {
            ComponentHealth::degraded("search_backend", "serving from fallback")
        } else {
            ComponentHealth::healthy("search_backend")
        }
    }
}
