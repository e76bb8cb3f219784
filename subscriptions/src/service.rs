//! Subscription workflows.
//!
//! Lifecycle changes are computed by [`crate::lifecycle`] and written with a
//! compare-and-set on the row version. A lost race re-reads and recomputes,
//! so a redelivered payment event that loses to its twin sees the applied
//! payment and becomes a no-op.

use crate::error::SubscriptionError;
use crate::lifecycle::{self, AppliedPayment, Transition};
use crate::store::SubscriptionStore;
use chrono::{DateTime, Utc};
use gym_core::EventPublisher;
use gym_core::domain::{Plan, Subscription, SubscriptionState};
use gym_core::envelope::coerce_u64;
use gym_core::environment::Clock;
use gym_runtime::UserDirectory;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

/// Compare-and-set attempts before giving up with `Contended`.
const MAX_CAS_ATTEMPTS: usize = 3;

/// Body of `POST /subscriptions`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSubscription {
    /// User id, as a number or a numeric string.
    pub usuario_id: Value,
    /// Plan to subscribe to.
    pub plan_id: String,
    /// Preferred payment method.
    #[serde(default)]
    pub metodo_pago: String,
    /// Auto-renew flag.
    #[serde(default)]
    pub auto_renovacion: bool,
    /// Initial note.
    #[serde(default)]
    pub notas: Option<String>,
}

/// Why a subscription is being cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason<'a> {
    /// The payment that paid for it was refunded.
    Refund {
        /// Refunded payment.
        payment_id: &'a str,
    },
    /// The user or an operator asked for it.
    Request,
}

impl CancelReason<'_> {
    const fn label(self) -> &'static str {
        match self {
            Self::Refund { .. } => "refund",
            Self::Request => "request",
        }
    }

    fn note(self, at: DateTime<Utc>) -> String {
        let date = at.format("%Y-%m-%d");
        match self {
            Self::Refund { payment_id } => format!("Reembolso procesado: {payment_id} (Fecha: {date})"),
            Self::Request => format!("Cancelada a pedido (Fecha: {date})"),
        }
    }
}

/// Subscriptions service facade.
#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn SubscriptionStore>,
    users: Arc<dyn UserDirectory>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl SubscriptionService {
    /// Assemble the service from its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        users: Arc<dyn UserDirectory>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            users,
            publisher,
            clock,
        }
    }

    /// Create a subscription awaiting its first payment.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::Validation`] for a malformed user id, user lookup
    /// failures, [`SubscriptionError::PlanNotFound`],
    /// [`SubscriptionError::PlanInactive`], or store errors.
    pub async fn create(&self, request: NewSubscription) -> Result<Subscription, SubscriptionError> {
        let user_id = coerce_u64(&request.usuario_id)
            .filter(|id| *id > 0)
            .ok_or_else(|| SubscriptionError::Validation(format!("invalid usuario_id {}", request.usuario_id)))?;
        self.users.ensure_exists(user_id).await?;

        let plan = self.store.plan(&request.plan_id).await?;
        if !plan.active {
            return Err(SubscriptionError::PlanInactive(plan.id));
        }

        let now = self.clock.now();
        let subscription = Subscription {
            id: new_id(),
            user_id: user_id.to_string(),
            plan_id: plan.id,
            state: SubscriptionState::PendingPayment,
            started_at: now,
            expires_at: None,
            payment_id: None,
            payment_method: request.metodo_pago,
            auto_renew: request.auto_renovacion,
            notes: request.notas.into_iter().filter(|n| !n.is_empty()).collect(),
            renewals: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        };
        self.store.insert(&subscription).await?;
        tracing::info!(subscription_id = %subscription.id, user_id, plan_id = %subscription.plan_id, "Subscription created");

        self.emit(
            "created",
            &subscription,
            json!({
                "usuario_id": subscription.user_id,
                "plan_id": subscription.plan_id,
                "estado": subscription.state.as_str(),
                "metodo_pago": subscription.payment_method,
            }),
        )
        .await;
        Ok(subscription)
    }

    /// Load one subscription.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::NotFound`] or store errors.
    pub async fn get(&self, id: &str) -> Result<Subscription, SubscriptionError> {
        self.store.get(id).await
    }

    /// Every subscription of a user, newest first.
    ///
    /// # Errors
    ///
    /// Store errors only.
    pub async fn for_user(&self, user_id: u64) -> Result<Vec<Subscription>, SubscriptionError> {
        self.store.for_user(&user_id.to_string()).await
    }

    /// The user's current active subscription.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::NotFound`] when the user has none.
    pub async fn active_for_user(&self, user_id: u64) -> Result<Subscription, SubscriptionError> {
        self.for_user(user_id)
            .await?
            .into_iter()
            .find(|s| s.state == SubscriptionState::Active)
            .ok_or_else(|| SubscriptionError::NotFound(format!("active subscription of user {user_id}")))
    }

    /// Every plan.
    ///
    /// # Errors
    ///
    /// Store errors only.
    pub async fn plans(&self) -> Result<Vec<Plan>, SubscriptionError> {
        self.store.plans().await
    }

    /// One plan.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::PlanNotFound`] or store errors.
    pub async fn plan(&self, plan_id: &str) -> Result<Plan, SubscriptionError> {
        self.store.plan(plan_id).await
    }

    /// Apply a completed payment: activate or renew, then publish
    /// `subscription.activated`. A replayed payment changes nothing.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::InvalidTransition`] for a cancelled subscription,
    /// [`SubscriptionError::NotFound`], contention, or store errors.
    pub async fn activate_by_payment(
        &self,
        subscription_id: &str,
        payment_id: &str,
        amount: f64,
    ) -> Result<(), SubscriptionError> {
        let current = self.store.get(subscription_id).await?;
        let plan = self.store.plan(&current.plan_id).await?;
        let payment = AppliedPayment {
            payment_id,
            amount,
            period: plan.period(),
            at: self.clock.now(),
        };

        let Some(active) = self
            .transition(current, |s| lifecycle::activate(s, &payment))
            .await?
        else {
            return Ok(());
        };

        tracing::info!(
            subscription_id,
            payment_id,
            expires_at = ?active.expires_at,
            "Subscription activated"
        );
        self.emit(
            "activated",
            &active,
            json!({
                "usuario_id": active.user_id,
                "plan_id": active.plan_id,
                "estado": active.state.as_str(),
                "pago_id": payment_id,
                "fecha_vencimiento": active.expires_at,
            }),
        )
        .await;
        Ok(())
    }

    /// Note a failed payment and publish `subscription.payment_failed`.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::NotFound`], contention, or store errors.
    pub async fn record_payment_failure(&self, subscription_id: &str, payment_id: &str) -> Result<(), SubscriptionError> {
        let current = self.store.get(subscription_id).await?;
        let now = self.clock.now();
        let Some(noted) = self
            .transition(current, |s| Ok(lifecycle::record_failure(s, payment_id, now)))
            .await?
        else {
            return Ok(());
        };

        tracing::info!(subscription_id, payment_id, "Payment failure recorded");
        self.emit(
            "payment_failed",
            &noted,
            json!({
                "usuario_id": noted.user_id,
                "plan_id": noted.plan_id,
                "estado": noted.state.as_str(),
                "pago_id": payment_id,
            }),
        )
        .await;
        Ok(())
    }

    /// Cancel and publish `subscription.cancelled` with the user id.
    ///
    /// Cancelled and expired subscriptions are left alone and nothing is
    /// published, so a redelivered refund produces no second event.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::NotFound`], contention, or store errors.
    pub async fn cancel(&self, subscription_id: &str, reason: CancelReason<'_>) -> Result<Subscription, SubscriptionError> {
        let current = self.store.get(subscription_id).await?;
        let now = self.clock.now();
        let fallback = current.clone();
        let Some(cancelled) = self
            .transition(current, |s| Ok(lifecycle::cancel(s, reason.note(now), now)))
            .await?
        else {
            return Ok(fallback);
        };

        tracing::info!(subscription_id, reason = reason.label(), "Subscription cancelled");
        let mut data = json!({
            "usuario_id": cancelled.user_id,
            "plan_id": cancelled.plan_id,
            "estado": cancelled.state.as_str(),
            "motivo": reason.label(),
        });
        if let CancelReason::Refund { payment_id } = reason {
            data["pago_id"] = json!(payment_id);
        }
        self.emit("cancelled", &cancelled, data).await;
        Ok(cancelled)
    }

    /// Expire every active subscription whose period has ended and publish
    /// `subscription.expired` for each. Returns how many expired.
    ///
    /// # Errors
    ///
    /// Store errors while listing; per-row failures are logged and skipped.
    pub async fn expire_overdue(&self) -> Result<usize, SubscriptionError> {
        let now = self.clock.now();
        let mut expired = 0;
        for current in self.store.overdue(now).await? {
            let id = current.id.clone();
            match self.transition(current, |s| Ok(lifecycle::expire(s, now))).await {
                Ok(Some(subscription)) => {
                    expired += 1;
                    self.emit(
                        "expired",
                        &subscription,
                        json!({
                            "usuario_id": subscription.user_id,
                            "plan_id": subscription.plan_id,
                            "estado": subscription.state.as_str(),
                        }),
                    )
                    .await;
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(subscription_id = %id, error = %e, "Failed to expire subscription"),
            }
        }
        if expired > 0 {
            tracing::info!(expired, "Expired overdue subscriptions");
        }
        Ok(expired)
    }

    /// Apply `decide` with compare-and-set, re-reading on conflict.
    ///
    /// Returns the written row (with its new version), or `None` when
    /// `decide` chose to leave the row alone.
    async fn transition<F>(&self, mut current: Subscription, decide: F) -> Result<Option<Subscription>, SubscriptionError>
    where
        F: Fn(&Subscription) -> Result<Transition, SubscriptionError> + Send + Sync,
    {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let mut next = match decide(&current)? {
                Transition::Apply(next) => *next,
                Transition::Unchanged(reason) => {
                    tracing::debug!(subscription_id = %current.id, reason, "Transition skipped");
                    return Ok(None);
                }
            };

            if self.store.replace(&next).await? {
                next.version += 1;
                return Ok(Some(next));
            }

            tracing::debug!(subscription_id = %current.id, attempt, "Lost compare-and-set, re-reading");
            current = self.store.get(&current.id).await?;
        }
        Err(SubscriptionError::Contended(current.id))
    }

    async fn emit(&self, action: &str, subscription: &Subscription, data: Value) {
        if let Err(e) = self
            .publisher
            .publish("subscription", action, &subscription.id, Some(data))
            .await
        {
            tracing::warn!(action, subscription_id = %subscription.id, error = %e, "Failed to publish subscription event");
        }
    }
}

/// 24 hex characters, the shape of the ids the other services already store.
fn new_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(24);
    id
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::memory::InMemorySubscriptionStore;
    use chrono::Duration;
    use gym_core::ErrorKind;
    use gym_core::domain::AccessType;
    use gym_runtime::PermissiveUserDirectory;
    use gym_testing::{FixedClock, RecordingPublisher, test_clock};

    fn basic_plan() -> Plan {
        Plan {
            id: "PLAN_BASIC".into(),
            name: "Basico".into(),
            description: String::new(),
            monthly_price: 5000.0,
            access_type: AccessType::Limited,
            duration_days: 30,
            active: true,
            allowed_activities: vec!["yoga".into()],
            activities_per_week: 3,
        }
    }

    struct Fixture {
        service: SubscriptionService,
        store: Arc<InMemorySubscriptionStore>,
        publisher: Arc<RecordingPublisher>,
        clock: FixedClock,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemorySubscriptionStore::new());
        store.insert_plan(basic_plan()).await;
        let mut retired = basic_plan();
        retired.id = "PLAN_OLD".into();
        retired.active = false;
        store.insert_plan(retired).await;

        let publisher = Arc::new(RecordingPublisher::new());
        let clock = test_clock();
        let service = SubscriptionService::new(
            store.clone(),
            Arc::new(PermissiveUserDirectory),
            publisher.clone(),
            Arc::new(clock.clone()),
        );
        Fixture {
            service,
            store,
            publisher,
            clock,
        }
    }

    fn request(plan: &str) -> NewSubscription {
        NewSubscription {
            usuario_id: json!("42"),
            plan_id: plan.into(),
            metodo_pago: "cash".into(),
            auto_renovacion: false,
            notas: None,
        }
    }

    #[tokio::test]
    async fn create_starts_pending_without_expiry() {
        let f = fixture().await;
        let created = f.service.create(request("PLAN_BASIC")).await.unwrap();

        assert_eq!(created.state, SubscriptionState::PendingPayment);
        assert_eq!(created.expires_at, None);
        assert_eq!(created.user_id, "42");
        assert_eq!(created.id.len(), 24);
        assert_eq!(f.publisher.count("subscription.created"), 1);
    }

    #[tokio::test]
    async fn create_validates_user_and_plan() {
        let f = fixture().await;

        let mut bad_user = request("PLAN_BASIC");
        bad_user.usuario_id = json!("abc");
        assert_eq!(f.service.create(bad_user).await.unwrap_err().kind(), ErrorKind::Validation);

        assert_eq!(f.service.create(request("NOPE")).await.unwrap_err().kind(), ErrorKind::NotFound);
        assert!(matches!(
            f.service.create(request("PLAN_OLD")).await.unwrap_err(),
            SubscriptionError::PlanInactive(_)
        ));
        assert_eq!(f.publisher.count("subscription.created"), 0);
    }

    #[tokio::test]
    async fn completed_payment_twice_equals_once() {
        let f = fixture().await;
        let created = f.service.create(request("PLAN_BASIC")).await.unwrap();

        f.service.activate_by_payment(&created.id, "pay-1", 5000.0).await.unwrap();
        let once = f.service.get(&created.id).await.unwrap();
        f.clock.advance(Duration::minutes(5));
        f.service.activate_by_payment(&created.id, "pay-1", 5000.0).await.unwrap();
        let twice = f.service.get(&created.id).await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(once.state, SubscriptionState::Active);
        assert_eq!(once.expires_at, Some(test_clock().now() + Duration::days(30)));
        assert_eq!(f.publisher.count("subscription.activated"), 1);
    }

    #[tokio::test]
    async fn refund_of_active_emits_exactly_one_cancellation() {
        let f = fixture().await;
        let created = f.service.create(request("PLAN_BASIC")).await.unwrap();
        f.service.activate_by_payment(&created.id, "pay-1", 5000.0).await.unwrap();

        let reason = CancelReason::Refund { payment_id: "pay-1" };
        let cancelled = f.service.cancel(&created.id, reason).await.unwrap();
        f.service.cancel(&created.id, reason).await.unwrap();

        assert_eq!(cancelled.state, SubscriptionState::Cancelled);
        assert_eq!(f.publisher.count("subscription.cancelled"), 1);
        let event = f
            .publisher
            .envelopes()
            .into_iter()
            .find(|e| e.action == "cancelled")
            .unwrap();
        assert_eq!(event.data_field("usuario_id").unwrap(), "42");
        assert_eq!(event.data_field("motivo").unwrap(), "refund");
    }

    #[tokio::test]
    async fn payment_failure_keeps_pending_and_notes_once() {
        let f = fixture().await;
        let created = f.service.create(request("PLAN_BASIC")).await.unwrap();

        f.service.record_payment_failure(&created.id, "pay-x").await.unwrap();
        f.service.record_payment_failure(&created.id, "pay-x").await.unwrap();

        let stored = f.service.get(&created.id).await.unwrap();
        assert_eq!(stored.state, SubscriptionState::PendingPayment);
        assert_eq!(stored.notes, vec!["Pago fallido: pay-x".to_string()]);
        assert_eq!(f.publisher.count("subscription.payment_failed"), 1);
    }

    #[tokio::test]
    async fn overdue_subscriptions_expire() {
        let f = fixture().await;
        let created = f.service.create(request("PLAN_BASIC")).await.unwrap();
        f.service.activate_by_payment(&created.id, "pay-1", 5000.0).await.unwrap();

        assert_eq!(f.service.expire_overdue().await.unwrap(), 0);
        f.clock.advance(Duration::days(31));
        assert_eq!(f.service.expire_overdue().await.unwrap(), 1);
        assert_eq!(f.service.get(&created.id).await.unwrap().state, SubscriptionState::Expired);
        assert_eq!(f.publisher.count("subscription.expired"), 1);

        f.service.activate_by_payment(&created.id, "pay-2", 5000.0).await.unwrap();
        let renewed = f.service.get(&created.id).await.unwrap();
        assert_eq!(renewed.state, SubscriptionState::Active);
        assert_eq!(renewed.renewals.len(), 2);
    }

    #[tokio::test]
    async fn active_lookup_by_user() {
        let f = fixture().await;
        assert_eq!(f.service.active_for_user(42).await.unwrap_err().kind(), ErrorKind::NotFound);
        let created = f.service.create(request("PLAN_BASIC")).await.unwrap();
        f.service.activate_by_payment(&created.id, "pay-1", 5000.0).await.unwrap();
        assert_eq!(f.service.active_for_user(42).await.unwrap().id, created.id);
        assert_eq!(f.store.for_user("42").await.unwrap().len(), 1);
    }
}
