//! Seams to the primary backend and the relational source of truth.

use crate::document::{SearchDocument, SearchRequest};
use crate::error::SearchError;
use async_trait::async_trait;

/// Primary full-text engine.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Cheap liveness probe.
    ///
    /// # Errors
    ///
    /// [`SearchError::Backend`] when the engine is unreachable.
    async fn ping(&self) -> Result<(), SearchError>;

    /// One page of matches plus the total match count.
    ///
    /// # Errors
    ///
    /// [`SearchError::Backend`] on transport or engine failure.
    async fn search(&self, request: &SearchRequest) -> Result<(Vec<SearchDocument>, i64), SearchError>;

    /// Insert or replace documents.
    ///
    /// # Errors
    ///
    /// [`SearchError::Backend`] on transport or engine failure.
    async fn index(&self, documents: &[SearchDocument]) -> Result<(), SearchError>;

    /// Remove a document by id.
    ///
    /// # Errors
    ///
    /// [`SearchError::Backend`] on transport or engine failure.
    async fn delete(&self, id: &str) -> Result<(), SearchError>;

    /// Overwrite only the seats left on an activity document.
    ///
    /// # Errors
    ///
    /// [`SearchError::Backend`] on transport or engine failure.
    async fn set_seats(&self, id: &str, seats: i64) -> Result<(), SearchError>;
}

/// Relational store the activities live in.
///
/// Serves as the structured fallback for searches and as the source for
/// (re)indexing activity documents with their current seats.
#[async_trait]
pub trait ActivitySource: Send + Sync {
    /// `LIKE` search over activities with the same filters and paging.
    ///
    /// # Errors
    ///
    /// [`SearchError::Database`] on store failure.
    async fn search(&self, request: &SearchRequest) -> Result<(Vec<SearchDocument>, i64), SearchError>;

    /// One activity as a document, with `cupo_disponible` computed from the
    /// active inscriptions. `None` if the activity does not exist.
    ///
    /// # Errors
    ///
    /// [`SearchError::Database`] on store failure.
    async fn activity(&self, id: &str) -> Result<Option<SearchDocument>, SearchError>;

    /// Every live activity as a document.
    ///
    /// # Errors
    ///
    /// [`SearchError::Database`] on store failure.
    async fn activities(&self) -> Result<Vec<SearchDocument>, SearchError>;
}
