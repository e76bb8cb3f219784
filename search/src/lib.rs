//! # Gym Search
//!
//! Read path over activities, plans and subscriptions.
//!
//! ```text
//! request ─► L1 ─► L2 (Redis) ─► Solr ─► SQL (ILIKE) ─► in-memory index
//!            └──── cache hit ───┘   └── degraded ──┘
//! ```
//!
//! The index is kept in step by [`IndexHandler`], bound to every
//! `activity.*`, `plan.*`, `subscription.*` and `inscription.*` event. Each
//! write invalidates the affected cache entries.
//!
//! # Example
//!
//! ```ignore
//! let index = Arc::new(MemoryIndex::new());
//! let service = Arc::new(
//!     SearchService::new(index)
//!         .with_backend(Arc::new(SolrClient::new(&solr_url, DEFAULT_TIMEOUT)?))
//!         .with_source(Arc::new(PostgresActivitySource::new(pool))),
//! );
//! service.initial_index().await;
//!
//! let cache = Arc::new(TwoTierCache::new(local_ttl, Some(redis), remote_ttl));
//! let router = search_routes(SearchState::new(service, cache));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod cache;
pub mod document;
pub mod error;
pub mod index;
pub mod indexer;
pub mod postgres;
pub mod routes;
pub mod service;
pub mod solr;

pub use backend::{ActivitySource, SearchBackend};
pub use cache::{RedisCache, RemoteCache, TwoTierCache, cache_key};
pub use document::{IndexStats, SearchDocument, SearchRequest, SearchResponse};
pub use error::SearchError;
pub use index::MemoryIndex;
pub use indexer::IndexHandler;
pub use postgres::PostgresActivitySource;
pub use routes::{SearchState, search_routes};
pub use service::{SearchService, Served, Source};
pub use solr::SolrClient;
