//! In-memory inscription store for tests and local runs without a database.
//!
//! One mutex guards activities and inscriptions together, which gives the
//! same admission atomicity as the row lock in `PostgreSQL`.

use crate::error::ActivityError;
use crate::store::{Admission, InscriptionStore, Seats, user_column};
use async_trait::async_trait;
use gym_core::domain::{Activity, Inscription};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct State {
    activities: HashMap<i64, Activity>,
    inscriptions: Vec<Inscription>,
    next_id: i64,
}

impl State {
    fn activity(&self, activity_id: i64) -> Result<&Activity, ActivityError> {
        self.activities
            .get(&activity_id)
            .ok_or(ActivityError::ActivityNotFound(activity_id))
    }

    fn active_count(&self, activity_id: i64) -> i64 {
        let count = self
            .inscriptions
            .iter()
            .filter(|i| i.activity_id == activity_id && i.active)
            .count();
        i64::try_from(count).unwrap_or(i64::MAX)
    }
}

/// Store backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryInscriptionStore {
    state: Mutex<State>,
}

impl InMemoryInscriptionStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an activity.
    pub async fn insert_activity(&self, activity: Activity) {
        self.state.lock().await.activities.insert(activity.id, activity);
    }

    /// Every inscription row, active or not.
    pub async fn inscriptions(&self) -> Vec<Inscription> {
        self.state.lock().await.inscriptions.clone()
    }
}

#[async_trait]
impl InscriptionStore for InMemoryInscriptionStore {
    async fn activity(&self, activity_id: i64) -> Result<Activity, ActivityError> {
        self.state.lock().await.activity(activity_id).cloned()
    }

    async fn seats(&self, activity_id: i64) -> Result<Seats, ActivityError> {
        let state = self.state.lock().await;
        let capacity = state.activity(activity_id)?.capacity;
        Ok(Seats::new(activity_id, capacity, state.active_count(activity_id)))
    }

    async fn admit(&self, admission: &Admission) -> Result<Inscription, ActivityError> {
        let user_id = user_column(admission.user_id)?;
        let mut state = self.state.lock().await;
        let capacity = state.activity(admission.activity_id)?.capacity;

        let existing = state
            .inscriptions
            .iter()
            .position(|i| i.user_id == user_id && i.activity_id == admission.activity_id);

        if let Some(index) = existing {
            if state.inscriptions[index].active {
                return Err(ActivityError::AlreadyEnrolled {
                    user_id: admission.user_id,
                    activity_id: admission.activity_id,
                });
            }
        }

        if state.active_count(admission.activity_id) >= i64::from(capacity) {
            return Err(ActivityError::CapacityExceeded {
                activity_id: admission.activity_id,
            });
        }

        if let Some(index) = existing {
            let row = &mut state.inscriptions[index];
            row.active = true;
            row.enrolled_at = admission.at;
            if admission.subscription_id.is_some() {
                row.subscription_id.clone_from(&admission.subscription_id);
            }
            return Ok(row.clone());
        }

        state.next_id += 1;
        let inscription = Inscription {
            id: state.next_id,
            user_id,
            activity_id: admission.activity_id,
            active: true,
            subscription_id: admission.subscription_id.clone(),
            enrolled_at: admission.at,
        };
        state.inscriptions.push(inscription.clone());
        Ok(inscription)
    }

    async fn deactivate(&self, user_id: u64, activity_id: i64) -> Result<Inscription, ActivityError> {
        let column = user_column(user_id)?;
        let mut state = self.state.lock().await;
        let row = state
            .inscriptions
            .iter_mut()
            .find(|i| i.user_id == column && i.activity_id == activity_id && i.active)
            .ok_or(ActivityError::InscriptionNotFound { user_id, activity_id })?;
        row.active = false;
        Ok(row.clone())
    }

    async fn deactivate_all_for_user(&self, user_id: u64) -> Result<Vec<i64>, ActivityError> {
        let column = user_column(user_id)?;
        let mut state = self.state.lock().await;
        Ok(state
            .inscriptions
            .iter_mut()
            .filter(|i| i.user_id == column && i.active)
            .map(|i| {
                i.active = false;
                i.activity_id
            })
            .collect())
    }

    async fn update_capacity(&self, activity_id: i64, capacity: i32) -> Result<Activity, ActivityError> {
        let mut state = self.state.lock().await;
        state.activity(activity_id)?;
        let active = state.active_count(activity_id);
        if i64::from(capacity) < active {
            return Err(ActivityError::CapacityConflict {
                activity_id,
                requested: capacity,
                active,
            });
        }
        let activity = state
            .activities
            .get_mut(&activity_id)
            .ok_or(ActivityError::ActivityNotFound(activity_id))?;
        activity.capacity = capacity;
        Ok(activity.clone())
    }

    async fn active_for_user(&self, user_id: u64) -> Result<Vec<Inscription>, ActivityError> {
        let column = user_column(user_id)?;
        Ok(self
            .state
            .lock()
            .await
            .inscriptions
            .iter()
            .filter(|i| i.user_id == column && i.active)
            .cloned()
            .collect())
    }
}
