//! Payment workflows.
//!
//! Creation is idempotent on the client-supplied key: a replay with the same
//! logical payload returns the stored payment and publishes nothing. Status
//! changes are a compare-and-set on the stored status, so two racing
//! completions yield one `payment.completed` event.

use crate::error::PaymentError;
use crate::store::{Inserted, PaymentFilter, PaymentStore};
use gym_core::domain::{Payment, PaymentStatus};
use gym_core::envelope::PaymentAction;
use gym_core::environment::Clock;
use gym_core::{EventPublisher, PaymentEvent};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use uuid::Uuid;

/// Compare-and-set attempts before giving up with `Contended`.
const MAX_CAS_ATTEMPTS: usize = 3;

/// Body of `POST /payments`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPayment {
    /// Kind of entity paid for (`subscription`, `inscription`).
    pub entity_type: String,
    /// Id of the entity paid for.
    pub entity_id: String,
    /// Paying user, as a number or a string.
    pub user_id: Value,
    /// Amount, strictly positive.
    pub amount: f64,
    /// ISO currency code.
    pub currency: String,
    /// Method chosen by the customer.
    pub payment_method: String,
    /// Gateway name; defaults to the method.
    #[serde(default)]
    pub payment_gateway: Option<String>,
    /// Key collapsing duplicate submissions.
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

/// Body of `PUT /payments/:id/status`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdate {
    /// Target status.
    pub status: PaymentStatus,
    /// Gateway-side transaction id.
    #[serde(default)]
    pub transaction_id: Option<String>,
    /// Refunded amount; the full amount when omitted.
    #[serde(default)]
    pub refund_amount: Option<f64>,
}

/// A created or replayed payment.
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    /// The stored payment.
    pub payment: Payment,
    /// Whether an earlier request with the same idempotency key created it.
    pub replayed: bool,
}

/// Payments service facade.
#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn PaymentStore>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl PaymentService {
    /// Assemble the service from its collaborators.
    #[must_use]
    pub fn new(store: Arc<dyn PaymentStore>, publisher: Arc<dyn EventPublisher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            publisher,
            clock,
        }
    }

    /// Record a pending payment and publish `payment.created.<entity_type>`.
    ///
    /// # Errors
    ///
    /// [`PaymentError::Validation`] for a malformed request,
    /// [`PaymentError::IdempotencyConflict`] when the key was used for a
    /// different payload, or store errors.
    pub async fn create(&self, request: NewPayment) -> Result<Recorded, PaymentError> {
        let payment = self.validate(request)?;

        match self.store.insert(&payment).await? {
            Inserted::Created(payment) => {
                tracing::info!(
                    payment_id = %payment.id,
                    entity_type = %payment.entity_type,
                    entity_id = %payment.entity_id,
                    amount = payment.amount,
                    "Payment created"
                );
                self.emit(PaymentAction::Created, &payment).await;
                Ok(Recorded {
                    payment,
                    replayed: false,
                })
            }
            Inserted::Existing(existing) => {
                if !same_payload(&existing, &payment) {
                    return Err(PaymentError::IdempotencyConflict {
                        key: payment.idempotency_key.unwrap_or_default(),
                        existing: existing.id,
                    });
                }
                tracing::info!(
                    payment_id = %existing.id,
                    idempotency_key = ?existing.idempotency_key,
                    "Duplicate payment request, returning the original"
                );
                Ok(Recorded {
                    payment: existing,
                    replayed: true,
                })
            }
        }
    }

    /// Load a payment.
    ///
    /// # Errors
    ///
    /// [`PaymentError::NotFound`] or store errors.
    pub async fn get(&self, id: &str) -> Result<Payment, PaymentError> {
        self.store.get(id).await
    }

    /// Payments passing `filter`, newest first.
    ///
    /// # Errors
    ///
    /// Store errors only.
    pub async fn list(&self, filter: &PaymentFilter) -> Result<Vec<Payment>, PaymentError> {
        self.store.list(filter).await
    }

    /// Payments of one user, newest first.
    ///
    /// # Errors
    ///
    /// Store errors only.
    pub async fn for_user(&self, user_id: &str) -> Result<Vec<Payment>, PaymentError> {
        self.store
            .list(&PaymentFilter {
                user_id: Some(user_id.to_string()),
                ..PaymentFilter::default()
            })
            .await
    }

    /// Move a payment to `update.status` and publish the matching event.
    ///
    /// Asking for the current status is a no-op that publishes nothing.
    ///
    /// # Errors
    ///
    /// [`PaymentError::NotFound`], [`PaymentError::InvalidTransition`],
    /// [`PaymentError::Validation`] for a refund amount outside
    /// `(0, amount]`, contention, or store errors.
    pub async fn update_status(&self, id: &str, update: StatusUpdate) -> Result<Payment, PaymentError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.store.get(id).await?;
            if current.status == update.status {
                tracing::debug!(payment_id = id, status = current.status.as_str(), "Status unchanged");
                return Ok(current);
            }
            if !current.status.can_transition_to(update.status) {
                return Err(PaymentError::InvalidTransition {
                    id: id.to_string(),
                    from: current.status,
                    to: update.status,
                });
            }

            let (next, action) = self.next_state(&current, &update)?;
            if self.store.update(current.status, &next).await? {
                tracing::info!(
                    payment_id = id,
                    from = current.status.as_str(),
                    to = next.status.as_str(),
                    "Payment status changed"
                );
                self.emit(action, &next).await;
                return Ok(next);
            }
            tracing::debug!(payment_id = id, "Lost status race, re-reading");
        }
        Err(PaymentError::Contended(id.to_string()))
    }

    /// Refund a completed payment, fully when `amount` is `None`.
    ///
    /// # Errors
    ///
    /// As [`update_status`](Self::update_status).
    pub async fn refund(&self, id: &str, amount: Option<f64>) -> Result<Payment, PaymentError> {
        self.update_status(
            id,
            StatusUpdate {
                status: PaymentStatus::Refunded,
                transaction_id: None,
                refund_amount: amount,
            },
        )
        .await
    }

    fn validate(&self, request: NewPayment) -> Result<Payment, PaymentError> {
        let user_id = match &request.user_id {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => String::new(),
        };
        let required = [
            ("entity_type", request.entity_type.trim()),
            ("entity_id", request.entity_id.trim()),
            ("user_id", user_id.as_str()),
            ("currency", request.currency.trim()),
            ("payment_method", request.payment_method.trim()),
        ];
        if let Some((field, _)) = required.iter().find(|(_, value)| value.is_empty()) {
            return Err(PaymentError::Validation(format!("{field} is required")));
        }
        if !request.amount.is_finite() || request.amount <= 0.0 {
            return Err(PaymentError::Validation(format!(
                "amount must be greater than zero, got {}",
                request.amount
            )));
        }

        let now = self.clock.now();
        let gateway = request
            .payment_gateway
            .filter(|g| !g.trim().is_empty())
            .unwrap_or_else(|| request.payment_method.clone());
        Ok(Payment {
            id: new_id(),
            entity_type: request.entity_type.trim().to_string(),
            entity_id: request.entity_id.trim().to_string(),
            user_id,
            amount: request.amount,
            currency: request.currency.trim().to_string(),
            status: PaymentStatus::Pending,
            payment_method: request.payment_method,
            payment_gateway: gateway,
            transaction_id: None,
            idempotency_key: request.idempotency_key.filter(|k| !k.is_empty()),
            metadata: request.metadata.unwrap_or_default(),
            created_at: now,
            updated_at: now,
            processed_at: None,
        })
    }

    fn next_state(
        &self,
        current: &Payment,
        update: &StatusUpdate,
    ) -> Result<(Payment, PaymentAction), PaymentError> {
        let now = self.clock.now();
        let mut next = current.clone();
        next.status = update.status;
        next.updated_at = now;
        if let Some(transaction_id) = update.transaction_id.as_ref().filter(|t| !t.is_empty()) {
            next.transaction_id = Some(transaction_id.clone());
        }

        let action = match update.status {
            PaymentStatus::Completed => {
                next.processed_at = Some(now);
                PaymentAction::Completed
            }
            PaymentStatus::Failed => PaymentAction::Failed,
            PaymentStatus::Refunded => {
                let refunded = update.refund_amount.unwrap_or(current.amount);
                if !refunded.is_finite() || refunded <= 0.0 || refunded > current.amount {
                    return Err(PaymentError::Validation(format!(
                        "refund_amount must be in (0, {}], got {refunded}",
                        current.amount
                    )));
                }
                next.metadata.insert("refund_amount".into(), json!(refunded));
                PaymentAction::Refunded
            }
            PaymentStatus::Pending => PaymentAction::Created,
        };
        Ok((next, action))
    }

    async fn emit(&self, action: PaymentAction, payment: &Payment) {
        let event = PaymentEvent {
            action: format!("payment.{}", action.as_str()),
            kind: "payment".to_string(),
            payment_id: payment.id.clone(),
            status: payment.status.as_str().to_string(),
            entity_type: payment.entity_type.clone(),
            entity_id: payment.entity_id.clone(),
            user_id: payment.user_id.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            transaction_id: payment.transaction_id.clone().unwrap_or_default(),
            payment_gateway: payment.payment_gateway.clone(),
            timestamp: self.clock.now(),
            metadata: payment.metadata.clone(),
        };
        if let Err(e) = self.publisher.publish_payment(&event).await {
            tracing::warn!(
                routing_key = %event.routing_key(),
                payment_id = %payment.id,
                error = %e,
                "Failed to publish payment event"
            );
        }
    }
}

/// Entity, user, amount and currency all match.
fn same_payload(stored: &Payment, requested: &Payment) -> bool {
    stored.entity_type == requested.entity_type
        && stored.entity_id == requested.entity_id
        && stored.user_id == requested.user_id
        && stored.currency == requested.currency
        && (stored.amount - requested.amount).abs() < 1e-9
}

fn new_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(24);
    id
}
