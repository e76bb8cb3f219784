//! HTTP surface of the search service.
//!
//! Searches and by-id lookups go through the two-tier cache. Every cached
//! response carries:
//!
//! - `X-Cache: HIT | MISS`
//! - `X-Search-Source: solr | sql | memory` (the layer that produced it, even
//!   when replayed from the cache)

use crate::cache::{CacheStats, TwoTierCache, cache_key};
use crate::document::{IndexStats, SearchDocument, SearchRequest, SearchResponse};
use crate::error::SearchError;
use crate::service::{SearchService, Served, Source};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use gym_web::WebResult;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Cache namespace of `POST /search`.
pub const SEARCH_PREFIX: &str = "search";

/// Cache namespace of `GET /search`.
pub const QUICKSEARCH_PREFIX: &str = "quicksearch";

/// Page size of `GET /search` when unset.
pub const QUICKSEARCH_PAGE_SIZE: i64 = 20;

/// Header naming the cache outcome.
pub const X_CACHE: &str = "x-cache";

/// Header naming the answering layer.
pub const X_SEARCH_SOURCE: &str = "x-search-source";

/// Shared handler state.
#[derive(Clone)]
pub struct SearchState {
    service: Arc<SearchService>,
    cache: Arc<TwoTierCache>,
}

impl SearchState {
    /// State over a service and its cache.
    #[must_use]
    pub const fn new(service: Arc<SearchService>, cache: Arc<TwoTierCache>) -> Self {
        Self { service, cache }
    }
}

/// Build the search router.
///
/// # Routes
///
/// - `POST /search` - Full search (cached under `search:`)
/// - `GET /search` - Quick search from query parameters (cached under `quicksearch:`)
/// - `GET /search/stats` - Index and cache statistics
/// - `GET /search/categories` - Known categories
/// - `POST /search/index` - Index documents, or reindex from the store when the body is empty
/// - `GET /search/:id` - One document (cached under `<type>:<id>`)
/// - `DELETE /search/:id` - Remove a document
pub fn search_routes(state: SearchState) -> Router {
    Router::new()
        .route("/search", post(search).get(quick_search))
        .route("/search/stats", get(stats))
        .route("/search/categories", get(categories))
        .route("/search/index", post(index))
        .route("/search/:id", get(get_document).delete(delete_document))
        .with_state(state)
}

/// What the cache holds for a results page.
#[derive(Serialize, Deserialize)]
struct CachedPage {
    source: Source,
    response: SearchResponse,
}

/// What the cache holds for a by-id lookup.
#[derive(Serialize, Deserialize)]
struct CachedDocument {
    document: SearchDocument,
}

fn with_headers<T: Serialize>(outcome: &'static str, source: Option<Source>, body: &T) -> Response {
    let mut response = Json(body).into_response();
    let headers = response.headers_mut();
    headers.insert(X_CACHE, HeaderValue::from_static(outcome));
    if let Some(source) = source {
        headers.insert(X_SEARCH_SOURCE, HeaderValue::from_static(source.as_str()));
    }
    response
}

async fn cached_search(state: &SearchState, prefix: &str, request: SearchRequest) -> Response {
    let request = request.normalized();
    let key = cache_key(prefix, &request);

    if let Some((bytes, _tier)) = state.cache.get(&key).await {
        match serde_json::from_slice::<CachedPage>(&bytes) {
            Ok(page) => return with_headers("HIT", Some(page.source), &page.response),
            Err(e) => tracing::warn!(key = %key, error = %e, "Discarding undecodable cache entry"),
        }
    }

    let Served { source, response } = state.service.search(request).await;
    let page = CachedPage { source, response };
    match serde_json::to_vec(&page) {
        Ok(bytes) => state.cache.set(&key, bytes).await,
        Err(e) => tracing::warn!(key = %key, error = %e, "Failed to encode results for the cache"),
    }
    with_headers("MISS", Some(page.source), &page.response)
}

/// Full search.
///
/// # Endpoint
///
/// ```text
/// POST /search
/// { "query": "yoga", "filters": { "dia": "lunes" }, "type": "activity", "page": 1, "page_size": 10 }
/// ```
async fn search(State(state): State<SearchState>, Json(request): Json<SearchRequest>) -> Response {
    cached_search(&state, SEARCH_PREFIX, request).await
}

/// Query parameters of `GET /search`.
#[derive(Debug, Default, Deserialize)]
pub struct QuickSearchParams {
    /// Free text.
    pub q: Option<String>,
    /// Document type.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Category filter.
    pub categoria: Option<String>,
    /// Day filter.
    pub dia: Option<String>,
    /// Instructor filter.
    pub instructor: Option<String>,
    /// 1-based page.
    pub page: Option<i64>,
    /// Results per page.
    pub page_size: Option<i64>,
}

impl QuickSearchParams {
    fn into_request(self) -> SearchRequest {
        let filters: BTreeMap<String, String> = [
            ("categoria", self.categoria),
            ("dia", self.dia),
            ("instructor", self.instructor),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key.to_string(), v)))
        .collect();

        SearchRequest {
            query: self.q.unwrap_or_default(),
            filters,
            kind: self.kind.unwrap_or_default(),
            page: self.page.unwrap_or(1),
            page_size: self.page_size.unwrap_or(QUICKSEARCH_PAGE_SIZE),
        }
    }
}

/// Quick search, e.g. `GET /search?q=yoga&type=activity&page=2`.
async fn quick_search(State(state): State<SearchState>, Query(params): Query<QuickSearchParams>) -> Response {
    cached_search(&state, QUICKSEARCH_PREFIX, params.into_request()).await
}

#[derive(Serialize)]
struct StatsBody {
    #[serde(flatten)]
    index: IndexStats,
    cache: CacheStats,
}

async fn stats(State(state): State<SearchState>) -> Json<StatsBody> {
    Json(StatsBody {
        index: state.service.stats().await,
        cache: state.cache.stats().await,
    })
}

async fn categories(State(state): State<SearchState>) -> Json<Value> {
    Json(json!({ "categories": state.service.categories().await }))
}

/// Body of `POST /search/index`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum IndexRequest {
    /// Several documents.
    Many(Vec<SearchDocument>),
    /// One document.
    One(SearchDocument),
}

/// Index documents.
///
/// With a body (one document or an array), indexes those documents. Without
/// one, reloads every activity from the relational store. `201` with the
/// number indexed.
async fn index(
    State(state): State<SearchState>,
    body: Option<Json<IndexRequest>>,
) -> WebResult<(StatusCode, Json<Value>)> {
    let (indexed, kinds) = match body {
        Some(Json(request)) => {
            let documents = match request {
                IndexRequest::Many(documents) => documents,
                IndexRequest::One(document) => vec![document],
            };
            let mut kinds: Vec<String> = documents.iter().map(|d| d.kind.clone()).collect();
            kinds.sort();
            kinds.dedup();
            (state.service.index_documents(documents).await?, kinds)
        }
        None => (state.service.initial_index().await, vec!["activity".to_string()]),
    };

    for kind in &kinds {
        state.cache.invalidate_kind(kind).await;
    }
    Ok((StatusCode::CREATED, Json(json!({ "indexed": indexed }))))
}

/// Query parameters of the by-id routes.
#[derive(Debug, Default, Deserialize)]
pub struct DocumentParams {
    /// Document type; defaults to `activity`.
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl DocumentParams {
    fn kind(&self) -> &str {
        self.kind.as_deref().filter(|k| !k.is_empty()).unwrap_or("activity")
    }
}

/// One document, e.g. `GET /search/7?type=activity`.
async fn get_document(
    State(state): State<SearchState>,
    Path(id): Path<String>,
    Query(params): Query<DocumentParams>,
) -> WebResult<Response> {
    let key = format!("{}:{id}", params.kind());

    if let Some((bytes, _tier)) = state.cache.get(&key).await {
        if let Ok(cached) = serde_json::from_slice::<CachedDocument>(&bytes) {
            return Ok(with_headers("HIT", None, &cached.document));
        }
    }

    let document = state.service.get_document(&id).await?;
    let cached = CachedDocument { document };
    if let Ok(bytes) = serde_json::to_vec(&cached) {
        state.cache.set(&key, bytes).await;
    }
    Ok(with_headers("MISS", None, &cached.document))
}

/// Remove a document; `404` if it was not indexed.
async fn delete_document(State(state): State<SearchState>, Path(id): Path<String>) -> WebResult<Json<Value>> {
    let removed = state
        .service
        .delete_document(&id)
        .await
        .ok_or_else(|| SearchError::NotFound(id.clone()))?;
    state.cache.invalidate_kind(&removed.kind).await;
    Ok(Json(json!({ "deleted": id, "type": removed.kind })))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::index::MemoryIndex;
    use crate::service::tests::{FakeBackend, FakeSource, doc};
    use axum_test::TestServer;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    struct Fixture {
        server: TestServer,
        service: Arc<SearchService>,
    }

    fn fixture(service: SearchService) -> Fixture {
        let service = Arc::new(service);
        let cache = Arc::new(TwoTierCache::new(Duration::from_secs(30), None, Duration::from_secs(60)));
        let server = TestServer::new(search_routes(SearchState::new(service.clone(), cache))).unwrap();
        Fixture { server, service }
    }

    #[tokio::test]
    async fn degraded_search_is_served_from_sql_then_cached() {
        let backend = Arc::new(FakeBackend::default());
        backend.down.store(true, Ordering::SeqCst);
        let source = Arc::new(FakeSource::with(vec![doc("7", "Yoga"), doc("8", "Spinning")]));
        let f = fixture(
            SearchService::new(Arc::new(MemoryIndex::new()))
                .with_backend(backend)
                .with_source(source),
        );

        let first = f.server.post("/search").json(&json!({"query": "yoga"})).await;
        first.assert_status_ok();
        assert_eq!(first.header(X_CACHE), "MISS");
        assert_eq!(first.header(X_SEARCH_SOURCE), "sql");
        let body: Value = first.json();
        assert_eq!(body["total_count"], 1);
        assert_eq!(body["results"][0]["titulo"], "Yoga");

        let second = f.server.post("/search").json(&json!({"query": "yoga"})).await;
        second.assert_status_ok();
        assert_eq!(second.header(X_CACHE), "HIT");
        assert_eq!(second.header(X_SEARCH_SOURCE), "sql");
        assert_eq!(second.json::<Value>(), body);
    }

    #[tokio::test]
    async fn quick_search_uses_its_own_defaults() {
        let f = fixture(SearchService::new(Arc::new(MemoryIndex::new())));
        f.service.index_document(doc("7", "Yoga")).await.unwrap();

        let response = f.server.get("/search").add_query_param("q", "yo").await;
        response.assert_status_ok();
        assert_eq!(response.header(X_SEARCH_SOURCE), "memory");
        let body: Value = response.json();
        assert_eq!(body["page_size"], 20);
        assert_eq!(body["results"][0]["id"], "7");
    }

    #[tokio::test]
    async fn writes_invalidate_cached_pages() {
        let f = fixture(SearchService::new(Arc::new(MemoryIndex::new())));
        let empty = f.server.post("/search").json(&json!({"query": "yoga"})).await;
        assert_eq!(empty.json::<Value>()["total_count"], 0);

        f.server
            .post("/search/index")
            .json(&json!({"id": "7", "type": "activity", "titulo": "Yoga"}))
            .await
            .assert_status(StatusCode::CREATED);

        let fresh = f.server.post("/search").json(&json!({"query": "yoga"})).await;
        assert_eq!(fresh.header(X_CACHE), "MISS");
        assert_eq!(fresh.json::<Value>()["total_count"], 1);
    }

    #[tokio::test]
    async fn bulk_index_and_stats() {
        let f = fixture(SearchService::new(Arc::new(MemoryIndex::new())));
        let response = f
            .server
            .post("/search/index")
            .json(&json!([
                {"id": "7", "type": "activity", "titulo": "Yoga", "categoria": "mente"},
                {"id": "PLAN_FULL", "type": "plan", "nombre": "Completo"}
            ]))
            .await;
        response.assert_status(StatusCode::CREATED);
        assert_eq!(response.json::<Value>()["indexed"], 2);

        let stats: Value = f.server.get("/search/stats").await.json();
        assert_eq!(stats["total_documents"], 2);
        assert_eq!(stats["documents_by_type"]["plan"], 1);
        assert_eq!(stats["degraded"], false);

        let categories: Value = f.server.get("/search/categories").await.json();
        assert_eq!(categories, json!({"categories": ["mente"]}));
    }

    #[tokio::test]
    async fn empty_index_body_reloads_from_the_store() {
        let source = Arc::new(FakeSource::with(vec![doc("1", "Yoga"), doc("2", "Box")]));
        let f = fixture(SearchService::new(Arc::new(MemoryIndex::new())).with_source(source));

        let response = f.server.post("/search/index").await;
        response.assert_status(StatusCode::CREATED);
        assert_eq!(response.json::<Value>()["indexed"], 2);
    }

    #[tokio::test]
    async fn invalid_documents_are_rejected() {
        let f = fixture(SearchService::new(Arc::new(MemoryIndex::new())));
        f.server
            .post("/search/index")
            .json(&json!({"titulo": "no id"}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn by_id_lookup_is_cached_and_invalidated_on_delete() {
        let f = fixture(SearchService::new(Arc::new(MemoryIndex::new())));
        f.service.index_document(doc("7", "Yoga")).await.unwrap();

        let first = f.server.get("/search/7").await;
        first.assert_status_ok();
        assert_eq!(first.header(X_CACHE), "MISS");
        assert_eq!(f.server.get("/search/7").await.header(X_CACHE), "HIT");

        let deleted = f.server.delete("/search/7").await;
        deleted.assert_status_ok();
        assert_eq!(deleted.json::<Value>()["deleted"], "7");

        f.server.get("/search/7").await.assert_status(StatusCode::NOT_FOUND);
        f.server.delete("/search/7").await.assert_status(StatusCode::NOT_FOUND);
    }
}
