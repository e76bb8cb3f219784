//! Inscription and capacity workflows.
//!
//! Every write commits in the store first and then publishes its event. A
//! failed publish is logged and does not undo the write.

use crate::error::ActivityError;
use crate::store::{Admission, InscriptionStore, Seats};
use gym_core::domain::{Activity, Inscription};
use gym_core::environment::Clock;
use gym_core::EventPublisher;
use gym_runtime::UserDirectory;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Body of `POST /inscripciones`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewInscription {
    /// Enrolling user.
    pub usuario_id: u64,
    /// Target activity.
    pub actividad_id: i64,
    /// Subscription the seat is charged to.
    #[serde(default)]
    pub suscripcion_id: Option<String>,
}

/// Activities service facade.
#[derive(Clone)]
pub struct ActivityService {
    store: Arc<dyn InscriptionStore>,
    users: Arc<dyn UserDirectory>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl ActivityService {
    /// Assemble the service from its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn InscriptionStore>,
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

    /// Enrol a user if a seat is free, then publish `inscription.created`.
    ///
    /// # Errors
    ///
    /// [`ActivityError::CapacityExceeded`], [`ActivityError::AlreadyEnrolled`],
    /// [`ActivityError::ActivityNotFound`], user validation failures, or
    /// store errors.
    pub async fn create_inscription(&self, request: NewInscription) -> Result<Inscription, ActivityError> {
        self.users.ensure_exists(request.usuario_id).await?;

        let inscription = self
            .store
            .admit(&Admission {
                user_id: request.usuario_id,
                activity_id: request.actividad_id,
                subscription_id: request.suscripcion_id,
                at: self.clock.now(),
            })
            .await?;

        tracing::info!(
            inscription_id = inscription.id,
            user_id = inscription.user_id,
            activity_id = inscription.activity_id,
            "Inscription admitted"
        );

        self.emit(
            "created",
            &inscription.id.to_string(),
            json!({
                "usuario_id": inscription.user_id,
                "actividad_id": inscription.activity_id,
                "is_activa": true,
                "suscripcion_id": inscription.subscription_id,
            }),
        )
        .await;

        Ok(inscription)
    }

    /// Release a seat and publish `inscription.deleted`.
    ///
    /// # Errors
    ///
    /// [`ActivityError::InscriptionNotFound`] or store errors.
    pub async fn deactivate_inscription(&self, user_id: u64, activity_id: i64) -> Result<(), ActivityError> {
        self.store.deactivate(user_id, activity_id).await?;
        tracing::info!(user_id, activity_id, "Inscription deactivated");
        self.emit_released(user_id, activity_id).await;
        Ok(())
    }

    /// Deactivate every active inscription of a user.
    ///
    /// Replays are no-ops. Capacity is never checked on the way down.
    ///
    /// # Errors
    ///
    /// Store errors only.
    pub async fn unenroll_user(&self, user_id: u64) -> Result<usize, ActivityError> {
        let released = self.store.deactivate_all_for_user(user_id).await?;
        tracing::info!(user_id, count = released.len(), "User unenrolled from activities");
        for activity_id in &released {
            self.emit_released(user_id, *activity_id).await;
        }
        Ok(released.len())
    }

    /// Change capacity and publish `activity.updated`.
    ///
    /// # Errors
    ///
    /// [`ActivityError::Validation`] for a negative capacity,
    /// [`ActivityError::CapacityConflict`] when below the active count.
    pub async fn update_capacity(&self, activity_id: i64, capacity: i32) -> Result<Activity, ActivityError> {
        if capacity < 0 {
            return Err(ActivityError::Validation(format!("cupo must be >= 0, got {capacity}")));
        }

        let activity = self.store.update_capacity(activity_id, capacity).await?;
        tracing::info!(activity_id, capacity, "Activity capacity updated");

        let data = serde_json::to_value(&activity).unwrap_or_else(|_| json!({ "cupo": capacity }));
        if let Err(e) = self
            .publisher
            .publish("activity", "updated", &activity_id.to_string(), Some(data))
            .await
        {
            tracing::warn!(activity_id, error = %e, "Failed to publish activity.updated");
        }
        Ok(activity)
    }

    /// Seat accounting for an activity.
    ///
    /// # Errors
    ///
    /// [`ActivityError::ActivityNotFound`] or store errors.
    pub async fn remaining_seats(&self, activity_id: i64) -> Result<Seats, ActivityError> {
        self.store.seats(activity_id).await
    }

    /// Active inscriptions of a user.
    ///
    /// # Errors
    ///
    /// Store errors only.
    pub async fn inscriptions_for_user(&self, user_id: u64) -> Result<Vec<Inscription>, ActivityError> {
        self.store.active_for_user(user_id).await
    }

    async fn emit_released(&self, user_id: u64, activity_id: i64) {
        self.emit(
            "deleted",
            &format!("{user_id}_{activity_id}"),
            json!({ "usuario_id": user_id, "actividad_id": activity_id }),
        )
        .await;
    }

    async fn emit(&self, action: &str, id: &str, data: serde_json::Value) {
        if let Err(e) = self.publisher.publish("inscription", action, id, Some(data)).await {
            tracing::warn!(action, id, error = %e, "Failed to publish inscription event");
        }
    }
}
