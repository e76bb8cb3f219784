//! Subscription cancellation reaching the activities queue over the
//! in-process bus.

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use gym_activities::{
    ActivityError, ActivityService, Admission, InMemoryInscriptionStore, InscriptionStore,
    NewInscription, Seats, UnenrollHandler, unenroll,
};
use gym_core::domain::{Activity, Inscription};
use gym_core::{Disposition, ErrorKind, EventPublisher};
use gym_runtime::PermissiveUserDirectory;
use gym_testing::{InMemoryBus, test_clock};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

fn activity(id: i64, capacity: i32) -> Activity {
    Activity {
        id,
        title: format!("Clase {id}"),
        description: String::new(),
        capacity,
        day: "lunes".into(),
        starts_at: "10:00".into(),
        ends_at: "11:00".into(),
        instructor: "Eva".into(),
        category: "funcional".into(),
        branch_id: None,
        active: true,
    }
}

/// Store whose bulk deactivation fails a fixed number of times first.
struct Flaky {
    inner: InMemoryInscriptionStore,
    failures_left: AtomicU32,
}

#[async_trait]
impl InscriptionStore for Flaky {
    async fn activity(&self, activity_id: i64) -> Result<Activity, ActivityError> {
        self.inner.activity(activity_id).await
    }

    async fn seats(&self, activity_id: i64) -> Result<Seats, ActivityError> {
        self.inner.seats(activity_id).await
    }

    async fn admit(&self, admission: &Admission) -> Result<Inscription, ActivityError> {
        self.inner.admit(admission).await
    }

    async fn deactivate(&self, user_id: u64, activity_id: i64) -> Result<Inscription, ActivityError> {
        self.inner.deactivate(user_id, activity_id).await
    }

    async fn deactivate_all_for_user(&self, user_id: u64) -> Result<Vec<i64>, ActivityError> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ActivityError::Database {
                kind: ErrorKind::Transient,
                message: "connection reset".into(),
            });
        }
        self.inner.deactivate_all_for_user(user_id).await
    }

    async fn update_capacity(&self, activity_id: i64, capacity: i32) -> Result<Activity, ActivityError> {
        self.inner.update_capacity(activity_id, capacity).await
    }

    async fn active_for_user(&self, user_id: u64) -> Result<Vec<Inscription>, ActivityError> {
        self.inner.active_for_user(user_id).await
    }
}

fn wire(store: Arc<dyn InscriptionStore>) -> (Arc<InMemoryBus>, ActivityService) {
    let bus = Arc::new(InMemoryBus::new());
    let service = ActivityService::new(
        store,
        Arc::new(PermissiveUserDirectory),
        bus.clone(),
        Arc::new(test_clock()),
    );
    bus.bind(
        unenroll::QUEUE,
        unenroll::BINDINGS,
        Arc::new(UnenrollHandler::new(service.clone())),
    );
    (bus, service)
}

async fn enrol(service: &ActivityService, user: u64, activity: i64) {
    service
        .create_inscription(NewInscription {
            usuario_id: user,
            actividad_id: activity,
            suscripcion_id: Some("sub-1".into()),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn cancellation_releases_every_seat_of_the_user() {
    let store = Arc::new(InMemoryInscriptionStore::new());
    store.insert_activity(activity(1, 5)).await;
    store.insert_activity(activity(2, 5)).await;
    let (bus, service) = wire(store.clone());

    enrol(&service, 42, 1).await;
    enrol(&service, 42, 2).await;
    enrol(&service, 7, 1).await;

    bus.publish("subscription", "cancelled", "sub-1", Some(json!({"usuario_id": "42"})))
        .await
        .unwrap();
    bus.drain().await;

    assert!(store.active_for_user(42).await.unwrap().is_empty());
    assert_eq!(store.active_for_user(7).await.unwrap().len(), 1);
    assert_eq!(bus.count("inscription.deleted"), 2);

    let deliveries = bus.deliveries_for(unenroll::QUEUE);
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].disposition, Disposition::Ack);
}

#[tokio::test]
async fn duplicate_cancellation_changes_nothing() {
    let store = Arc::new(InMemoryInscriptionStore::new());
    store.insert_activity(activity(1, 5)).await;
    let (bus, service) = wire(store.clone());
    enrol(&service, 42, 1).await;

    for _ in 0..2 {
        bus.publish("subscription", "cancelled", "sub-1", Some(json!({"usuario_id": 42})))
            .await
            .unwrap();
    }
    bus.drain().await;

    assert_eq!(bus.count("inscription.deleted"), 1);
    assert!(
        bus.deliveries_for(unenroll::QUEUE)
            .iter()
            .all(|d| d.disposition == Disposition::Ack)
    );
}

#[tokio::test]
async fn cancellation_without_user_is_acked_without_effects() {
    let store = Arc::new(InMemoryInscriptionStore::new());
    store.insert_activity(activity(1, 5)).await;
    let (bus, service) = wire(store.clone());
    enrol(&service, 42, 1).await;

    bus.publish("subscription", "cancelled", "sub-1", Some(json!({"usuario_id": null})))
        .await
        .unwrap();
    bus.drain().await;

    assert_eq!(store.active_for_user(42).await.unwrap().len(), 1);
    let deliveries = bus.deliveries_for(unenroll::QUEUE);
    assert_eq!(deliveries[0].disposition, Disposition::Ignore);
    assert_eq!(deliveries[0].attempt, 1);
}

#[tokio::test]
async fn undecodable_body_is_rejected_once() {
    let store = Arc::new(InMemoryInscriptionStore::new());
    let (bus, _) = wire(store);

    bus.inject("subscription.cancelled", b"{not json");
    bus.drain().await;

    let deliveries = bus.deliveries_for(unenroll::QUEUE);
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].disposition, Disposition::Reject);
}

#[tokio::test]
async fn store_outage_is_requeued_until_it_recovers() {
    let flaky = Arc::new(Flaky {
        inner: InMemoryInscriptionStore::new(),
        failures_left: AtomicU32::new(2),
    });
    flaky.inner.insert_activity(activity(1, 5)).await;
    let (bus, service) = wire(flaky.clone());
    enrol(&service, 42, 1).await;

    bus.publish("subscription", "cancelled", "sub-1", Some(json!({"usuario_id": 42})))
        .await
        .unwrap();
    bus.drain().await;

    let outcomes: Vec<_> = bus
        .deliveries_for(unenroll::QUEUE)
        .iter()
        .map(|d| d.disposition)
        .collect();
    assert_eq!(
        outcomes,
        vec![Disposition::Requeue, Disposition::Requeue, Disposition::Ack]
    );
    assert!(flaky.active_for_user(42).await.unwrap().is_empty());
}
