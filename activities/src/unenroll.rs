//! Subscription cancellation consumer.
//!
//! Bound to `subscription.cancelled` on the activities queue. A cancelled
//! subscription releases every seat the user holds; replays find nothing left
//! to deactivate and ack.

use crate::service::ActivityService;
use async_trait::async_trait;
use gym_core::envelope::coerce_u64;
use gym_core::routing;
use gym_core::{EntityKind, EventAction, EventEnvelope, EventHandler, HandlerError};

/// Queue consumed by the activities service.
pub const QUEUE: &str = routing::ACTIVITIES_QUEUE;

/// Patterns bound to [`QUEUE`].
pub const BINDINGS: &[&str] = routing::ACTIVITIES_BINDINGS;

/// Deactivates a user's inscriptions when their subscription is cancelled.
pub struct UnenrollHandler {
    service: ActivityService,
}

impl UnenrollHandler {
    /// Handler over `service`.
    #[must_use]
    pub const fn new(service: ActivityService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl EventHandler for UnenrollHandler {
    type Event = EventEnvelope;

    fn name(&self) -> &'static str {
        "activities-unenroll"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError> {
        if event.entity_kind() != EntityKind::Subscription
            || event.event_action() != EventAction::Cancelled
        {
            tracing::debug!(kind = %event.kind, action = %event.action, "Skipping event");
            return Ok(());
        }

        let user_id = event
            .data_field("usuario_id")
            .and_then(coerce_u64)
            .ok_or_else(|| {
                HandlerError::Permanent(format!(
                    "subscription {} cancelled without a usable usuario_id",
                    event.id
                ))
            })?;

        let released = self
            .service
            .unenroll_user(user_id)
            .await
            .map_err(|e| HandlerError::from_kind(e.kind(), e.to_string()))?;

        tracing::info!(
            subscription_id = %event.id,
            user_id,
            released,
            "Released seats for cancelled subscription"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::memory::InMemoryInscriptionStore;
    use crate::service::NewInscription;
    use gym_core::dispatch;
    use gym_core::Disposition;
    use gym_runtime::PermissiveUserDirectory;
    use gym_testing::{RecordingPublisher, test_clock};
    use serde_json::json;
    use std::sync::Arc;

    async fn handler_with_enrolment() -> (UnenrollHandler, Arc<InMemoryInscriptionStore>) {
        let store = Arc::new(InMemoryInscriptionStore::new());
        store
            .insert_activity(gym_core::domain::Activity {
                id: 1,
                title: "Spinning".into(),
                description: String::new(),
                capacity: 10,
                day: "martes".into(),
                starts_at: "18:00".into(),
                ends_at: "19:00".into(),
                instructor: "Leo".into(),
                category: "cardio".into(),
                branch_id: None,
                active: true,
            })
            .await;
        let service = ActivityService::new(
            store.clone(),
            Arc::new(PermissiveUserDirectory),
            Arc::new(RecordingPublisher::new()),
            Arc::new(test_clock()),
        );
        service
            .create_inscription(NewInscription {
                usuario_id: 42,
                actividad_id: 1,
                suscripcion_id: None,
            })
            .await
            .unwrap();
        (UnenrollHandler::new(service), store)
    }

    fn cancelled(data: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&EventEnvelope::new("subscription", "cancelled", "s1", Some(data))).unwrap()
    }

    #[tokio::test]
    async fn string_user_id_is_coerced() {
        let (handler, store) = handler_with_enrolment().await;
        let disposition = dispatch(&handler, "subscription.cancelled", &cancelled(json!({"usuario_id": "42"}))).await;
        assert_eq!(disposition, Disposition::Ack);
        assert!(store.inscriptions().await.iter().all(|i| !i.active));
    }

    #[tokio::test]
    async fn null_user_id_is_acked_and_ignored() {
        let (handler, store) = handler_with_enrolment().await;
        let disposition = dispatch(&handler, "subscription.cancelled", &cancelled(json!({"usuario_id": null}))).await;
        assert_eq!(disposition, Disposition::Ignore);
        assert!(store.inscriptions().await[0].active);
    }

    #[tokio::test]
    async fn other_actions_are_skipped() {
        let (handler, store) = handler_with_enrolment().await;
        let body = serde_json::to_vec(&EventEnvelope::new(
            "subscription",
            "activated",
            "s1",
            Some(json!({"usuario_id": 42})),
        ))
        .unwrap();
        assert_eq!(dispatch(&handler, "subscription.activated", &body).await, Disposition::Ack);
        assert!(store.inscriptions().await[0].active);
    }

    #[tokio::test]
    async fn redelivery_is_harmless() {
        let (handler, _) = handler_with_enrolment().await;
        let body = cancelled(json!({"usuario_id": 42}));
        assert_eq!(dispatch(&handler, "subscription.cancelled", &body).await, Disposition::Ack);
        assert_eq!(dispatch(&handler, "subscription.cancelled", &body).await, Disposition::Ack);
    }
}
