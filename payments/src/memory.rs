//! In-memory payment store.

use crate::error::PaymentError;
use crate::store::{Inserted, PaymentFilter, PaymentStore};
use async_trait::async_trait;
use gym_core::domain::{Payment, PaymentStatus};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    payments: HashMap<String, Payment>,
    by_key: HashMap<String, String>,
}

/// Store backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryPaymentStore {
    tables: RwLock<Tables>,
}

impl InMemoryPaymentStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: &Payment) -> Result<Inserted, PaymentError> {
        let mut tables = self.tables.write().await;
        if let Some(key) = &payment.idempotency_key {
            if let Some(existing) = tables.by_key.get(key).and_then(|id| tables.payments.get(id)) {
                return Ok(Inserted::Existing(existing.clone()));
            }
            tables.by_key.insert(key.clone(), payment.id.clone());
        }
        tables.payments.insert(payment.id.clone(), payment.clone());
        Ok(Inserted::Created(payment.clone()))
    }

    async fn get(&self, id: &str) -> Result<Payment, PaymentError> {
        self.tables
            .read()
            .await
            .payments
            .get(id)
            .cloned()
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))
    }

    async fn list(&self, filter: &PaymentFilter) -> Result<Vec<Payment>, PaymentError> {
        let mut found: Vec<Payment> = self
            .tables
            .read()
            .await
            .payments
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(found)
    }

    async fn update(&self, expected: PaymentStatus, next: &Payment) -> Result<bool, PaymentError> {
        let mut tables = self.tables.write().await;
        let Some(stored) = tables.payments.get_mut(&next.id) else {
            return Err(PaymentError::NotFound(next.id.clone()));
        };
        if stored.status != expected {
            return Ok(false);
        }
        *stored = next.clone();
        Ok(true)
    }
}
