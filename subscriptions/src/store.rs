//! Subscription and plan persistence.

use crate::error::SubscriptionError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gym_core::domain::{Plan, Subscription};

/// Storage for subscriptions and the plans they reference.
///
/// Lifecycle writes go through [`replace`](SubscriptionStore::replace), a
/// compare-and-set on [`Subscription::version`].
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Load a plan.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::PlanNotFound`] or a store error.
    async fn plan(&self, plan_id: &str) -> Result<Plan, SubscriptionError>;

    /// Every plan, sorted by id.
    ///
    /// # Errors
    ///
    /// Store errors only.
    async fn plans(&self) -> Result<Vec<Plan>, SubscriptionError>;

    /// Persist a new subscription.
    ///
    /// # Errors
    ///
    /// Store errors only.
    async fn insert(&self, subscription: &Subscription) -> Result<(), SubscriptionError>;

    /// Load a subscription.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::NotFound`] or a store error.
    async fn get(&self, id: &str) -> Result<Subscription, SubscriptionError>;

    /// Subscriptions of a user, newest first.
    ///
    /// # Errors
    ///
    /// Store errors only.
    async fn for_user(&self, user_id: &str) -> Result<Vec<Subscription>, SubscriptionError>;

    /// Write `next` if the stored version still equals `next.version`.
    ///
    /// Returns `false` when another writer got there first. The stored
    /// version is bumped on success.
    ///
    /// # Errors
    ///
    /// Store errors only.
    async fn replace(&self, next: &Subscription) -> Result<bool, SubscriptionError>;

    /// Active subscriptions whose expiry is at or before `now`.
    ///
    /// # Errors
    ///
    /// Store errors only.
    async fn overdue(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>, SubscriptionError>;
}
