//! End-to-end flows across the four services, wired in-process over the
//! in-memory bus with the same bindings the broker uses.

#![allow(clippy::unwrap_used)]

use axum_test::TestServer;
use gym_activities::{ActivityService, InMemoryInscriptionStore, NewInscription, UnenrollHandler};
use gym_core::domain::{AccessType, Activity, Plan, SubscriptionState};
use gym_core::environment::Clock;
use gym_core::{Disposition, EventPublisher};
use gym_payments::{InMemoryPaymentStore, NewPayment, PaymentService, StatusUpdate};
use gym_runtime::PermissiveUserDirectory;
use gym_search::{IndexHandler, MemoryIndex, SearchService, SearchState, TwoTierCache, search_routes};
use gym_subscriptions::{InMemorySubscriptionStore, NewSubscription, PaymentEventHandler, SubscriptionService};
use gym_testing::{FixedClock, InMemoryBus, test_clock};
use gym_web::{HealthChecks, service_router};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

const USER: u64 = 42;

struct Gym {
    bus: Arc<InMemoryBus>,
    clock: FixedClock,
    inscriptions: Arc<InMemoryInscriptionStore>,
    activities: ActivityService,
    subscriptions: SubscriptionService,
    payments: PaymentService,
    search: Arc<SearchService>,
    cache: Arc<TwoTierCache>,
}

impl Gym {
    async fn new() -> Self {
        let bus = Arc::new(InMemoryBus::new());
        let publisher: Arc<dyn EventPublisher> = bus.clone();
        let clock = test_clock();

        let plans = Arc::new(InMemorySubscriptionStore::new());
        plans
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
        let subscriptions = SubscriptionService::new(
            plans,
            Arc::new(PermissiveUserDirectory),
            publisher.clone(),
            Arc::new(clock.clone()),
        );

        let inscriptions = Arc::new(InMemoryInscriptionStore::new());
        for (id, title) in [(1, "Spinning"), (2, "Yoga"), (3, "Funcional")] {
            inscriptions
                .insert_activity(Activity {
                    id,
                    title: title.into(),
                    description: String::new(),
                    capacity: 10,
                    day: "lunes".into(),
                    starts_at: "08:00".into(),
                    ends_at: "09:00".into(),
                    instructor: "Ana".into(),
                    category: "cardio".into(),
                    branch_id: None,
                    active: true,
                })
                .await;
        }
        let activities = ActivityService::new(
            inscriptions.clone(),
            Arc::new(PermissiveUserDirectory),
            publisher.clone(),
            Arc::new(clock.clone()),
        );

        let payments = PaymentService::new(
            Arc::new(InMemoryPaymentStore::new()),
            publisher,
            Arc::new(clock.clone()),
        );

        let search = Arc::new(SearchService::new(Arc::new(MemoryIndex::new())));
        let cache = Arc::new(TwoTierCache::new(Duration::from_secs(30), None, Duration::from_secs(60)));

        bus.bind(
            gym_subscriptions::payment_handler::QUEUE,
            gym_subscriptions::payment_handler::BINDINGS,
            Arc::new(PaymentEventHandler::new(subscriptions.clone())),
        );
        bus.bind(
            gym_activities::unenroll::QUEUE,
            gym_activities::unenroll::BINDINGS,
            Arc::new(UnenrollHandler::new(activities.clone())),
        );
        bus.bind(
            gym_search::indexer::QUEUE,
            gym_search::indexer::BINDINGS,
            Arc::new(IndexHandler::new(search.clone(), cache.clone())),
        );

        Self {
            bus,
            clock,
            inscriptions,
            activities,
            subscriptions,
            payments,
            search,
            cache,
        }
    }

    async fn subscribe(&self) -> String {
        self.subscriptions
            .create(NewSubscription {
                usuario_id: json!(USER.to_string()),
                plan_id: "PLAN_FULL".into(),
                metodo_pago: "cash".into(),
                auto_renovacion: false,
                notas: None,
            })
            .await
            .unwrap()
            .id
    }

    async fn pay(&self, subscription_id: &str, key: &str) -> String {
        self.payments
            .create(NewPayment {
                entity_type: "subscription".into(),
                entity_id: subscription_id.into(),
                user_id: json!(USER.to_string()),
                amount: 9000.0,
                currency: "ARS".into(),
                payment_method: "cash".into(),
                payment_gateway: None,
                idempotency_key: Some(key.into()),
                metadata: None,
            })
            .await
            .unwrap()
            .payment
            .id
    }

    async fn complete(&self, payment_id: &str) {
        self.payments
            .update_status(
                payment_id,
                StatusUpdate {
                    status: gym_core::domain::PaymentStatus::Completed,
                    transaction_id: Some("tx-1".into()),
                    refund_amount: None,
                },
            )
            .await
            .unwrap();
    }

    async fn active_subscription(&self) -> (String, String) {
        let subscription_id = self.subscribe().await;
        let payment_id = self.pay(&subscription_id, "order-1").await;
        self.complete(&payment_id).await;
        self.bus.drain().await;
        (subscription_id, payment_id)
    }
}

#[tokio::test]
async fn completed_payment_activates_subscription() {
    let gym = Gym::new().await;
    let subscription_id = gym.subscribe().await;
    assert_eq!(
        gym.subscriptions.get(&subscription_id).await.unwrap().state,
        SubscriptionState::PendingPayment
    );

    let payment_id = gym.pay(&subscription_id, "order-1").await;
    gym.complete(&payment_id).await;
    gym.bus.drain().await;

    let subscription = gym.subscriptions.get(&subscription_id).await.unwrap();
    assert_eq!(subscription.state, SubscriptionState::Active);
    assert_eq!(subscription.payment_id.as_deref(), Some(payment_id.as_str()));
    assert!(subscription.expires_at.unwrap() > gym.clock.now());
    assert_eq!(gym.bus.count("subscription.activated"), 1);

    let document = gym.search.index().get(&subscription_id).await.unwrap();
    assert_eq!(document.kind, "subscription");
    assert_eq!(document.estado, "active");
}

#[tokio::test]
async fn refund_cancels_subscription_and_releases_seats() {
    let gym = Gym::new().await;
    let (subscription_id, payment_id) = gym.active_subscription().await;

    for actividad_id in 1..=3 {
        gym.activities
            .create_inscription(NewInscription {
                usuario_id: USER,
                actividad_id,
                suscripcion_id: Some(subscription_id.clone()),
            })
            .await
            .unwrap();
    }
    gym.bus.drain().await;

    gym.payments.refund(&payment_id, None).await.unwrap();
    gym.bus.drain().await;

    let subscription = gym.subscriptions.get(&subscription_id).await.unwrap();
    assert_eq!(subscription.state, SubscriptionState::Cancelled);
    assert_eq!(gym.subscriptions.for_user(USER).await.unwrap().len(), 1);
    assert_eq!(gym.bus.count("subscription.cancelled"), 1);

    let inscriptions = gym.inscriptions.inscriptions().await;
    assert_eq!(inscriptions.len(), 3);
    assert!(inscriptions.iter().all(|i| !i.active));
    for actividad_id in 1..=3 {
        assert_eq!(gym.activities.remaining_seats(actividad_id).await.unwrap().remaining, 10);
    }

    assert!(
        gym.bus
            .deliveries_for(gym_activities::unenroll::QUEUE)
            .iter()
            .all(|d| d.disposition == Disposition::Ack)
    );
    assert_eq!(gym.search.index().get(&subscription_id).await.unwrap().estado, "cancelled");
}

#[tokio::test]
async fn duplicate_payment_submission_is_collapsed() {
    let gym = Gym::new().await;
    let subscription_id = gym.subscribe().await;

    let first = gym.pay(&subscription_id, "order-7").await;
    let second = gym.pay(&subscription_id, "order-7").await;
    gym.bus.drain().await;

    assert_eq!(first, second);
    assert_eq!(gym.bus.count("payment.created.subscription"), 1);
    assert_eq!(gym.payments.for_user(&USER.to_string()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn poison_cancellation_is_dropped_without_side_effects() {
    let gym = Gym::new().await;
    let (subscription_id, _) = gym.active_subscription().await;
    gym.activities
        .create_inscription(NewInscription {
            usuario_id: USER,
            actividad_id: 1,
            suscripcion_id: Some(subscription_id.clone()),
        })
        .await
        .unwrap();
    gym.bus.drain().await;

    let poison = json!({
        "action": "cancelled",
        "type": "subscription",
        "id": subscription_id,
        "timestamp": "2025-01-01T00:00:00Z",
        "data": {"usuario_id": null},
    });
    gym.bus.inject("subscription.cancelled", poison.to_string().as_bytes());
    gym.bus.drain().await;

    let deliveries = gym.bus.deliveries_for(gym_activities::unenroll::QUEUE);
    let last = deliveries.last().unwrap();
    assert_eq!(last.disposition, Disposition::Ignore);
    assert_eq!(last.attempt, 1);

    assert!(gym.inscriptions.inscriptions().await.iter().all(|i| i.active));
    assert_eq!(
        gym.subscriptions.get(&subscription_id).await.unwrap().state,
        SubscriptionState::Active
    );
    assert_eq!(gym.bus.pending(), 0);
}

#[tokio::test]
async fn lifecycle_events_invalidate_cached_search_pages() {
    let gym = Gym::new().await;
    let (subscription_id, payment_id) = gym.active_subscription().await;

    let routes = search_routes(SearchState::new(gym.search.clone(), gym.cache.clone()));
    let server = TestServer::new(service_router(routes, HealthChecks::new().with(gym.search.clone()))).unwrap();
    let query = json!({"type": "subscription", "filters": {"estado": "active"}});

    let first = server.post("/search").json(&query).await;
    assert_eq!(first.header("x-cache"), "MISS");
    assert_eq!(first.json::<Value>()["total_count"], 1);
    assert_eq!(server.post("/search").json(&query).await.header("x-cache"), "HIT");

    gym.payments.refund(&payment_id, None).await.unwrap();
    gym.bus.drain().await;

    let after = server.post("/search").json(&query).await;
    assert_eq!(after.header("x-cache"), "MISS");
    assert_eq!(after.json::<Value>()["total_count"], 0);

    let document = server.get(&format!("/search/{subscription_id}")).add_query_param("type", "subscription").await;
    document.assert_status_ok();
    assert_eq!(document.json::<Value>()["estado"], "cancelled");

    server.get("/health/ready").await.assert_status_ok();
}
