//! Payment events consumer.
//!
//! | Routing key | Effect |
//! |-------------|--------|
//! | `payment.created.subscription` | logged only |
//! | `payment.completed.subscription` | activate or renew |
//! | `payment.failed.subscription` | note the failure, state unchanged |
//! | `payment.refunded.subscription` | cancel, publish `subscription.cancelled` |

use crate::service::{CancelReason, SubscriptionService};
use async_trait::async_trait;
use gym_core::routing;
use gym_core::{EventHandler, HandlerError, PaymentAction, PaymentEvent};

/// Queue consumed by the subscriptions service.
pub const QUEUE: &str = routing::SUBSCRIPTIONS_PAYMENT_QUEUE;

/// Patterns bound to the payment queue.
pub const BINDINGS: &[&str] = routing::SUBSCRIPTION_PAYMENT_BINDINGS;

/// Drives subscription state from payment events.
pub struct PaymentEventHandler {
    service: SubscriptionService,
}

impl PaymentEventHandler {
    /// Handler over `service`.
    #[must_use]
    pub const fn new(service: SubscriptionService) -> Self {
        Self { service }
    }
}

fn expect_status(event: &PaymentEvent, expected: &str) -> Result<(), HandlerError> {
    if event.status.is_empty() || event.status == expected {
        Ok(())
    } else {
        Err(HandlerError::Permanent(format!(
            "{} for payment {} carries status {}",
            event.action, event.payment_id, event.status
        )))
    }
}

#[async_trait]
impl EventHandler for PaymentEventHandler {
    type Event = PaymentEvent;

    fn name(&self) -> &'static str {
        "subscriptions-payments"
    }

    async fn handle(&self, event: &PaymentEvent) -> Result<(), HandlerError> {
        if !event.is_for_subscription() {
            tracing::debug!(entity_type = %event.entity_type, payment_id = %event.payment_id, "Skipping non-subscription payment");
            return Ok(());
        }

        let action = event
            .payment_action()
            .ok_or_else(|| HandlerError::Permanent(format!("unknown payment action {}", event.action)))?;

        if event.entity_id.is_empty() {
            return Err(HandlerError::Permanent(format!(
                "{} for payment {} has no entity_id",
                event.action, event.payment_id
            )));
        }

        if event.payment_id.trim().is_empty() {
            return Err(HandlerError::Permanent(format!(
                "{} for subscription {} has no payment_id",
                event.action, event.entity_id
            )));
        }

        let subscription_id = event.entity_id.as_str();
        let result = match action {
            PaymentAction::Created => {
                tracing::info!(payment_id = %event.payment_id, subscription_id, "Payment recorded for subscription");
                return Ok(());
            }
            PaymentAction::Completed => {
                expect_status(event, "completed")?;
                self.service
                    .activate_by_payment(subscription_id, &event.payment_id, event.amount)
                    .await
            }
            PaymentAction::Failed => {
                self.service
                    .record_payment_failure(subscription_id, &event.payment_id)
                    .await
            }
            PaymentAction::Refunded => {
                expect_status(event, "refunded")?;
                self.service
                    .cancel(
                        subscription_id,
                        CancelReason::Refund {
                            payment_id: &event.payment_id,
                        },
                    )
                    .await
                    .map(|_| ())
            }
        };

        result.map_err(|e| HandlerError::from_kind(e.kind(), e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::memory::InMemorySubscriptionStore;
    use crate::service::NewSubscription;
    use gym_core::domain::{AccessType, Plan, SubscriptionState};
    use gym_core::{Disposition, dispatch};
    use gym_runtime::PermissiveUserDirectory;
    use gym_testing::{RecordingPublisher, test_clock};
    use serde_json::json;
    use std::sync::Arc;

    async fn setup() -> (PaymentEventHandler, SubscriptionService, String) {
        let store = Arc::new(InMemorySubscriptionStore::new());
        store
            .insert_plan(Plan {
                id: "PLAN_FULL".into(),
                name: "Completo".into(),
                description: String::new(),
                monthly_price: 9000.0,
                access_type: AccessType::Full,
                duration_days: 30,
                active: true,
                allowed_activities: Vec::new(),
                activities_per_week: 0,
            })
            .await;
        let service = SubscriptionService::new(
            store,
            Arc::new(PermissiveUserDirectory),
            Arc::new(RecordingPublisher::new()),
            Arc::new(test_clock()),
        );
        let created = service
            .create(NewSubscription {
                usuario_id: json!(7),
                plan_id: "PLAN_FULL".into(),
                metodo_pago: "mercadopago".into(),
                auto_renovacion: true,
                notas: None,
            })
            .await
            .unwrap();
        (PaymentEventHandler::new(service.clone()), service, created.id)
    }

    fn body(action: &str, status: &str, entity_type: &str, entity_id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "action": action,
            "type": "payment",
            "payment_id": "pay-1",
            "status": status,
            "entity_type": entity_type,
            "entity_id": entity_id,
            "user_id": "7",
            "amount": 9000,
            "currency": "ARS",
            "payment_gateway": "mercadopago",
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn completed_payment_activates() {
        let (handler, service, id) = setup().await;
        let disposition = dispatch(
            &handler,
            "payment.completed.subscription",
            &body("payment.completed", "completed", "subscription", &id),
        )
        .await;
        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(service.get(&id).await.unwrap().state, SubscriptionState::Active);
    }

    #[tokio::test]
    async fn blank_payment_id_does_not_activate() {
        let (handler, service, id) = setup().await;
        let mut event: serde_json::Value =
            serde_json::from_slice(&body("payment.completed", "completed", "subscription", &id)).unwrap();
        event["payment_id"] = json!("");
        let disposition = dispatch(
            &handler,
            "payment.completed.subscription",
            &serde_json::to_vec(&event).unwrap(),
        )
        .await;
        assert_eq!(disposition, Disposition::Ignore);

        let subscription = service.get(&id).await.unwrap();
        assert_eq!(subscription.state, SubscriptionState::PendingPayment);
        assert_eq!(subscription.payment_id, None);

        let disposition = dispatch(
            &handler,
            "payment.completed.subscription",
            &body("payment.completed", "completed", "subscription", &id),
        )
        .await;
        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(service.get(&id).await.unwrap().payment_id.as_deref(), Some("pay-1"));
    }

    #[tokio::test]
    async fn other_entity_types_are_acked_untouched() {
        let (handler, service, id) = setup().await;
        let disposition = dispatch(
            &handler,
            "payment.completed.inscription",
            &body("payment.completed", "completed", "inscription", &id),
        )
        .await;
        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(service.get(&id).await.unwrap().state, SubscriptionState::PendingPayment);
    }

    #[tokio::test]
    async fn created_is_log_only() {
        let (handler, service, id) = setup().await;
        let disposition = dispatch(
            &handler,
            "payment.created.subscription",
            &body("payment.created", "pending", "subscription", &id),
        )
        .await;
        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(service.get(&id).await.unwrap().version, 0);
    }

    #[tokio::test]
    async fn unknown_subscription_is_not_retried() {
        let (handler, _, _) = setup().await;
        let disposition = dispatch(
            &handler,
            "payment.completed.subscription",
            &body("payment.completed", "completed", "subscription", "missing"),
        )
        .await;
        assert_eq!(disposition, Disposition::Ignore);
    }

    #[tokio::test]
    async fn mismatched_status_is_ignored() {
        let (handler, service, id) = setup().await;
        let disposition = dispatch(
            &handler,
            "payment.completed.subscription",
            &body("payment.completed", "failed", "subscription", &id),
        )
        .await;
        assert_eq!(disposition, Disposition::Ignore);
        assert_eq!(service.get(&id).await.unwrap().state, SubscriptionState::PendingPayment);
    }

    #[tokio::test]
    async fn refund_of_pending_cancels() {
        let (handler, service, id) = setup().await;
        let disposition = dispatch(
            &handler,
            "payment.refunded.subscription",
            &body("payment.refunded", "refunded", "subscription", &id),
        )
        .await;
        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(service.get(&id).await.unwrap().state, SubscriptionState::Cancelled);
    }
}
