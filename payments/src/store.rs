//! Payment persistence.

use crate::error::PaymentError;
use async_trait::async_trait;
use gym_core::domain::{Payment, PaymentStatus};

/// Outcome of an insert that may collide on the idempotency key.
#[derive(Debug, Clone, PartialEq)]
pub enum Inserted {
    /// The row was written.
    Created(Payment),
    /// A payment with the same idempotency key already existed.
    Existing(Payment),
}

/// Filters for [`PaymentStore::list`]. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentFilter {
    /// Paying user.
    pub user_id: Option<String>,
    /// Entity kind.
    pub entity_type: Option<String>,
    /// Entity id.
    pub entity_id: Option<String>,
    /// Status.
    pub status: Option<PaymentStatus>,
}

impl PaymentFilter {
    /// Whether `payment` passes every set field.
    #[must_use]
    pub fn matches(&self, payment: &Payment) -> bool {
        self.user_id.as_ref().is_none_or(|u| *u == payment.user_id)
            && self.entity_type.as_ref().is_none_or(|t| *t == payment.entity_type)
            && self.entity_id.as_ref().is_none_or(|e| *e == payment.entity_id)
            && self.status.is_none_or(|s| s == payment.status)
    }
}

/// Storage for payments.
///
/// Status changes go through [`update`](PaymentStore::update), a
/// compare-and-set on the stored status.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Insert `payment` unless its idempotency key is already taken.
    ///
    /// # Errors
    ///
    /// Store errors only.
    async fn insert(&self, payment: &Payment) -> Result<Inserted, PaymentError>;

    /// Load a payment.
    ///
    /// # Errors
    ///
    /// [`PaymentError::NotFound`] or a store error.
    async fn get(&self, id: &str) -> Result<Payment, PaymentError>;

    /// Payments passing `filter`, newest first.
    ///
    /// # Errors
    ///
    /// Store errors only.
    async fn list(&self, filter: &PaymentFilter) -> Result<Vec<Payment>, PaymentError>;

    /// Write `next` if the stored status still equals `expected`.
    ///
    /// Returns `false` when another writer changed the status first.
    ///
    /// # Errors
    ///
    /// [`PaymentError::NotFound`] or a store error.
    async fn update(&self, expected: PaymentStatus, next: &Payment) -> Result<bool, PaymentError>;
}
