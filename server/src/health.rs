//! Readiness probes for the shared dependencies.

use async_trait::async_trait;
use gym_core::EventPublisher;
use gym_postgres::PgPool;
use gym_web::{ComponentHealth, HealthCheck};
use std::sync::Arc;

/// Runs `SELECT 1` on the pool.
pub struct DatabaseHealth {
    pool: PgPool,
}

impl DatabaseHealth {
    /// Probe for `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealthCheck for DatabaseHealth {
    async fn check(&self) -> ComponentHealth {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => ComponentHealth::healthy("database"),
            Err(e) => ComponentHealth::unhealthy("database", e.to_string()),
        }
    }
}

/// Degraded while the publisher is the null publisher.
pub struct BusHealth {
    publisher: Arc<dyn EventPublisher>,
}

impl BusHealth {
    /// Probe for `publisher`.
    #[must_use]
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl HealthCheck for BusHealth {
    async fn check(&self) -> ComponentHealth {
        if self.publisher.is_live() {
            ComponentHealth::healthy("event_bus")
        } else {
            ComponentHealth::degraded("event_bus", "broker unreachable, events are dropped")
        }
    }
}
