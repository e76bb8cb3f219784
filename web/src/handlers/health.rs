//! Health check endpoints.
//!
//! - `GET /health`: liveness, never touches dependencies
//! - `GET /health/ready`: runs every registered [`HealthCheck`]; the service
//!   is ready unless a component is unhealthy. A degraded component (null
//!   publisher, search fallback mode) still answers 200.

use async_trait::async_trait;
use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;
use std::sync::Arc;

/// Component state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    /// Working normally.
    Healthy,
    /// Working with reduced guarantees.
    Degraded,
    /// Not working.
    Unhealthy,
}

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentHealth {
    /// Component name (`database`, `event_bus`, ...).
    pub component: String,
    /// Current state.
    pub status: HealthStatus,
    /// Detail for operators.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentHealth {
    /// Healthy component.
    #[must_use]
    pub fn healthy(component: &str) -> Self {
        Self {
            component: component.to_string(),
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    /// Degraded component.
    #[must_use]
    pub fn degraded(component: &str, message: impl Into<String>) -> Self {
        Self {
            component: component.to_string(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
        }
    }

    /// Failed component.
    #[must_use]
    pub fn unhealthy(component: &str, message: impl Into<String>) -> Self {
        Self {
            component: component.to_string(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

/// A dependency probe.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Probe the dependency.
    async fn check(&self) -> ComponentHealth;
}

/// The checks a service registers for `/health/ready`.
#[derive(Clone, Default)]
pub struct HealthChecks {
    checks: Vec<Arc<dyn HealthCheck>>,
}

impl HealthChecks {
    /// No checks; always ready.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a check.
    #[must_use]
    pub fn with(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// Run every check concurrently.
    pub async fn run(&self) -> HealthReport {
        let components =
            futures::future::join_all(self.checks.iter().map(|check| check.check())).await;

        let status = if components.iter().any(|c| c.status == HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else if components.iter().any(|c| c.status == HealthStatus::Degraded) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthReport { status, components }
    }
}

/// Body of `/health/ready`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Worst component state.
    pub status: HealthStatus,
    /// Per-component results.
    pub components: Vec<ComponentHealth>,
}

/// Liveness endpoint.
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness endpoint.
pub async fn readiness(State(checks): State<HealthChecks>) -> (StatusCode, Json<HealthReport>) {
    let report = checks.run().await;
    let status = match report.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report))
}

/// `/health` and `/health/ready`.
pub fn health_routes(checks: HealthChecks) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness))
        .with_state(checks)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use axum_test::TestServer;

    struct Fixed(ComponentHealth);

    #[async_trait]
    impl HealthCheck for Fixed {
        async fn check(&self) -> ComponentHealth {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn liveness_is_plain_ok() {
        let (status, body) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn degraded_component_is_still_ready() {
        let checks = HealthChecks::new()
            .with(Arc::new(Fixed(ComponentHealth::healthy("database"))))
            .with(Arc::new(Fixed(ComponentHealth::degraded("event_bus", "null publisher"))));
        let server = TestServer::new(health_routes(checks)).unwrap();

        let response = server.get("/health/ready").await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["status"], "Degraded");
        assert_eq!(body["components"][1]["message"], "null publisher");
    }

    #[tokio::test]
    async fn unhealthy_component_fails_readiness() {
        let checks = HealthChecks::new()
            .with(Arc::new(Fixed(ComponentHealth::unhealthy("database", "pool timed out"))));
        let server = TestServer::new(health_routes(checks)).unwrap();

        server
            .get("/health/ready")
            .await
            .assert_status(StatusCode::SERVICE_UNAVAILABLE);
    }
}
