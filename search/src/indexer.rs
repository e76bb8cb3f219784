//! Index maintenance consumer.
//!
//! Bound to every activity, plan, subscription and inscription event:
//!
//! - `inscription.*` recomputes the seats left on the referenced activity
//! - `<type>.deleted` removes the document
//! - `activity.*` reindexes from the relational store, falling back to the
//!   event payload
//! - anything else with a payload upserts the document it describes
//!
//! After the write, cached by-id entries of the event's type and every cached
//! results page are invalidated.

use crate::cache::TwoTierCache;
use crate::document::SearchDocument;
use crate::service::SearchService;
use async_trait::async_trait;
use gym_core::envelope::coerce_u64;
use gym_core::routing;
use gym_core::{EntityKind, EventAction, EventEnvelope, EventHandler, HandlerError};
use std::sync::Arc;

/// Queue consumed by the search service.
pub const QUEUE: &str = routing::SEARCH_QUEUE;

/// Patterns bound to [`QUEUE`].
pub const BINDINGS: &[&str] = routing::SEARCH_BINDINGS;

/// Keeps the search layers and the cache in step with domain writes.
pub struct IndexHandler {
    service: Arc<SearchService>,
    cache: Arc<TwoTierCache>,
}

impl IndexHandler {
    /// Handler writing through `service` and invalidating `cache`.
    #[must_use]
    pub const fn new(service: Arc<SearchService>, cache: Arc<TwoTierCache>) -> Self {
        Self { service, cache }
    }

    async fn refresh_seats(&self, event: &EventEnvelope) -> Result<(), HandlerError> {
        let activity_id = event
            .data_field("actividad_id")
            .and_then(coerce_u64)
            .ok_or_else(|| {
                HandlerError::Permanent(format!("inscription {} has no usable actividad_id", event.id))
            })?
            .to_string();

        let found = self
            .service
            .refresh_seats(&activity_id)
            .await
            .map_err(|e| HandlerError::from_kind(e.kind(), e.to_string()))?;
        if !found {
            tracing::warn!(activity_id = %activity_id, inscription = %event.id, "Inscription refers to an unknown activity");
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for IndexHandler {
    type Event = EventEnvelope;

    fn name(&self) -> &'static str {
        "search-indexer"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError> {
        let kind = event.entity_kind();
        let action = event.event_action();

        let invalidate = match (&kind, &action) {
            (EntityKind::Inscription, _) => {
                self.refresh_seats(event).await?;
                EntityKind::Activity.as_str().to_string()
            }
            (_, EventAction::Deleted) => {
                if self.service.delete_document(&event.id).await.is_none() {
                    tracing::debug!(kind = %event.kind, id = %event.id, "Deleted document was not indexed");
                }
                event.kind.clone()
            }
            (EntityKind::Activity, _) => {
                let payload = SearchDocument::from_event(&event.kind, &event.id, event.data.as_ref());
                self.service
                    .reindex_activity(payload)
                    .await
                    .map_err(|e| HandlerError::from_kind(e.kind(), e.to_string()))?;
                event.kind.clone()
            }
            _ if event.data.is_some() => {
                let document = SearchDocument::from_event(&event.kind, &event.id, event.data.as_ref());
                self.service
                    .index_document(document)
                    .await
                    .map_err(|e| HandlerError::from_kind(e.kind(), e.to_string()))?;
                event.kind.clone()
            }
            _ => {
                tracing::debug!(kind = %event.kind, action = %event.action, id = %event.id, "Event carries no document");
                return Ok(());
            }
        };

        self.cache.invalidate_kind(&invalidate).await;
        tracing::info!(kind = %event.kind, action = %event.action, id = %event.id, "Search index updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::cache::cache_key;
    use crate::index::MemoryIndex;
    use crate::service::tests::{FakeSource, doc};
    use gym_core::{Disposition, dispatch};
    use serde_json::{Value, json};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    struct Fixture {
        handler: IndexHandler,
        service: Arc<SearchService>,
        cache: Arc<TwoTierCache>,
        source: Arc<FakeSource>,
    }

    fn fixture() -> Fixture {
        let source = Arc::new(FakeSource::with(vec![doc("7", "Yoga")]));
        let service = Arc::new(SearchService::new(Arc::new(MemoryIndex::new())).with_source(source.clone()));
        let cache = Arc::new(TwoTierCache::new(Duration::from_secs(30), None, Duration::from_secs(60)));
        Fixture {
            handler: IndexHandler::new(service.clone(), cache.clone()),
            service,
            cache,
            source,
        }
    }

    fn body(kind: &str, action: &str, id: &str, data: Option<Value>) -> Vec<u8> {
        serde_json::to_vec(&EventEnvelope::new(kind, action, id, data)).unwrap()
    }

    #[tokio::test]
    async fn activity_writes_reindex_and_invalidate() {
        let f = fixture();
        f.cache.set("activity:7", b"old".to_vec()).await;
        f.cache.set(&cache_key("search", "yoga"), b"old".to_vec()).await;
        f.cache.set("plan:p1", b"keep".to_vec()).await;

        let event = body("activity", "create", "7", Some(json!({"id_actividad": 7, "titulo": "Yoga"})));
        assert_eq!(dispatch(&f.handler, "activity.create", &event).await, Disposition::Ack);

        assert_eq!(f.service.get_document("7").await.unwrap().cupo_disponible, Some(10));
        assert!(f.cache.get("activity:7").await.is_none());
        assert!(f.cache.get(&cache_key("search", "yoga")).await.is_none());
        assert!(f.cache.get("plan:p1").await.is_some());
    }

    #[tokio::test]
    async fn plan_payload_is_indexed_and_deleted() {
        let f = fixture();
        let created = body("plan", "created", "PLAN_FULL", Some(json!({"nombre": "Completo", "precio_mensual": 9000})));
        assert_eq!(dispatch(&f.handler, "plan.created", &created).await, Disposition::Ack);
        assert_eq!(f.service.index().get("PLAN_FULL").await.unwrap().plan_nombre, "Completo");

        let deleted = body("plan", "deleted", "PLAN_FULL", None);
        assert_eq!(dispatch(&f.handler, "plan.deleted", &deleted).await, Disposition::Ack);
        assert!(f.service.index().get("PLAN_FULL").await.is_none());
    }

    #[tokio::test]
    async fn inscriptions_refresh_seats() {
        let f = fixture();
        f.service.index_document(doc("7", "Yoga")).await.unwrap();
        f.source.activities.lock().unwrap()[0].cupo_disponible = Some(9);

        let event = body("inscription", "created", "42_7", Some(json!({"usuario_id": 42, "actividad_id": "7"})));
        assert_eq!(dispatch(&f.handler, "inscription.created", &event).await, Disposition::Ack);
        assert_eq!(f.service.index().get("7").await.unwrap().cupo_disponible, Some(9));
    }

    #[tokio::test]
    async fn store_outage_requeues_seat_refresh() {
        let f = fixture();
        f.source.down.store(true, Ordering::SeqCst);
        let event = body("inscription", "deleted", "42_7", Some(json!({"actividad_id": 7})));
        assert_eq!(dispatch(&f.handler, "inscription.deleted", &event).await, Disposition::Requeue);
    }

    #[tokio::test]
    async fn unknown_activity_and_bad_payloads_are_acked() {
        let f = fixture();
        let unknown = body("inscription", "created", "42_99", Some(json!({"actividad_id": 99})));
        assert_eq!(dispatch(&f.handler, "inscription.created", &unknown).await, Disposition::Ack);

        let missing = body("inscription", "created", "42_x", Some(json!({"actividad_id": null})));
        assert_eq!(dispatch(&f.handler, "inscription.created", &missing).await, Disposition::Ignore);
    }

    #[tokio::test]
    async fn bare_events_are_skipped() {
        let f = fixture();
        let event = body("subscription", "activated", "s1", None);
        assert_eq!(dispatch(&f.handler, "subscription.activated", &event).await, Disposition::Ack);
        assert!(f.service.index().get("s1").await.is_none());
    }
}
