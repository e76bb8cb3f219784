//! Inscription store contract.
//!
//! Every implementation must make admission atomic: the seat count and the
//! insert (or reactivation) happen under one lock, so two concurrent
//! admissions can never both take the last seat.

use crate::error::ActivityError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gym_core::domain::{Activity, Inscription};
use serde::Serialize;

/// Request to take a seat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Enrolling user.
    pub user_id: u64,
    /// Target activity.
    pub activity_id: i64,
    /// Subscription the seat is charged to, if any.
    pub subscription_id: Option<String>,
    /// Enrolment time.
    pub at: DateTime<Utc>,
}

/// Seat accounting for one activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Seats {
    /// Activity id.
    #[serde(rename = "actividad_id")]
    pub activity_id: i64,
    /// Capacity.
    #[serde(rename = "cupo")]
    pub capacity: i32,
    /// Active inscriptions.
    #[serde(rename = "inscripciones_activas")]
    pub active: i64,
    /// `capacity - active`, never negative.
    #[serde(rename = "lugares_disponibles")]
    pub remaining: i64,
}

impl Seats {
    /// Derive remaining seats.
    #[must_use]
    pub fn new(activity_id: i64, capacity: i32, active: i64) -> Self {
        Self {
            activity_id,
            capacity,
            active,
            remaining: (i64::from(capacity) - active).max(0),
        }
    }
}

/// Persistence for activities and inscriptions.
#[async_trait]
pub trait InscriptionStore: Send + Sync {
    /// Load a live activity.
    ///
    /// # Errors
    ///
    /// [`ActivityError::ActivityNotFound`] or a store error.
    async fn activity(&self, activity_id: i64) -> Result<Activity, ActivityError>;

    /// Current seat accounting.
    ///
    /// # Errors
    ///
    /// [`ActivityError::ActivityNotFound`] or a store error.
    async fn seats(&self, activity_id: i64) -> Result<Seats, ActivityError>;

    /// Atomically check seats and insert or reactivate the inscription.
    ///
    /// # Errors
    ///
    /// [`ActivityError::CapacityExceeded`] when no seat remains,
    /// [`ActivityError::AlreadyEnrolled`] when the pair is already active,
    /// [`ActivityError::ActivityNotFound`], or a store error.
    async fn admit(&self, admission: &Admission) -> Result<Inscription, ActivityError>;

    /// Deactivate one inscription.
    ///
    /// # Errors
    ///
    /// [`ActivityError::InscriptionNotFound`] when the pair has no active row.
    async fn deactivate(&self, user_id: u64, activity_id: i64) -> Result<Inscription, ActivityError>;

    /// Deactivate every active inscription of `user_id` in one statement.
    ///
    /// Returns the activity ids that lost a seat holder; empty when the user
    /// had none, so replays are no-ops.
    ///
    /// # Errors
    ///
    /// Store errors only.
    async fn deactivate_all_for_user(&self, user_id: u64) -> Result<Vec<i64>, ActivityError>;

    /// Change capacity unless it would drop below the active count.
    ///
    /// # Errors
    ///
    /// [`ActivityError::CapacityConflict`] leaves the row untouched.
    async fn update_capacity(&self, activity_id: i64, capacity: i32) -> Result<Activity, ActivityError>;

    /// Active inscriptions held by `user_id`.
    ///
    /// # Errors
    ///
    /// Store errors only.
    async fn active_for_user(&self, user_id: u64) -> Result<Vec<Inscription>, ActivityError>;
}

/// Convert a user id for storage.
///
/// # Errors
///
/// [`ActivityError::Validation`] when the id does not fit a signed column.
pub fn user_column(user_id: u64) -> Result<i64, ActivityError> {
    i64::try_from(user_id).map_err(|_| ActivityError::Validation(format!("user id {user_id} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_never_negative() {
        assert_eq!(Seats::new(1, 10, 4).remaining, 6);
        assert_eq!(Seats::new(1, 4, 5).remaining, 0);
    }

    #[test]
    fn huge_user_ids_are_rejected() {
        assert!(user_column(u64::MAX).is_err());
        assert_eq!(user_column(42), Ok(42));
    }
}
