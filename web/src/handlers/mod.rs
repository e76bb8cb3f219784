//! Shared HTTP handlers.

pub mod health;

pub use health::{
    ComponentHealth, HealthCheck, HealthChecks, HealthReport, HealthStatus, health_check,
    health_routes, readiness,
};
