//! In-memory subscription store.

use crate::error::SubscriptionError;
use crate::store::SubscriptionStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gym_core::domain::{Plan, Subscription, SubscriptionState};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Store backed by process memory.
#[derive(Debug, Default)]
pub struct InMemorySubscriptionStore {
    plans: RwLock<BTreeMap<String, Plan>>,
    subscriptions: RwLock<HashMap<String, Subscription>>,
}

impl InMemorySubscriptionStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a plan.
    pub async fn insert_plan(&self, plan: Plan) {
        self.plans.write().await.insert(plan.id.clone(), plan);
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn plan(&self, plan_id: &str) -> Result<Plan, SubscriptionError> {
        self.plans
            .read()
            .await
            .get(plan_id)
            .cloned()
            .ok_or_else(|| SubscriptionError::PlanNotFound(plan_id.to_string()))
    }

    async fn plans(&self) -> Result<Vec<Plan>, SubscriptionError> {
        Ok(self.plans.read().await.values().cloned().collect())
    }

    async fn insert(&self, subscription: &Subscription) -> Result<(), SubscriptionError> {
        self.subscriptions
            .write()
            .await
            .insert(subscription.id.clone(), subscription.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Subscription, SubscriptionError> {
        self.subscriptions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SubscriptionError::NotFound(id.to_string()))
    }

    async fn for_user(&self, user_id: &str) -> Result<Vec<Subscription>, SubscriptionError> {
        let mut found: Vec<Subscription> = self
            .subscriptions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(found)
    }

    async fn replace(&self, next: &Subscription) -> Result<bool, SubscriptionError> {
        let mut subscriptions = self.subscriptions.write().await;
        let Some(stored) = subscriptions.get_mut(&next.id) else {
            return Err(SubscriptionError::NotFound(next.id.clone()));
        };
        if stored.version != next.version {
            return Ok(false);
        }
        *stored = next.clone();
        stored.version += 1;
        Ok(true)
    }

    async fn overdue(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>, SubscriptionError> {
        Ok(self
            .subscriptions
            .read()
            .await
            .values()
            .filter(|s| {
                s.state == SubscriptionState::Active && s.expires_at.is_some_and(|expiry| expiry <= now)
            })
            .cloned()
            .collect())
    }
}
