//! Axum glue shared by the gym services.
//!
//! Every service exposes the same HTTP shell around its own routes:
//!
//! ```text
//! request ─► TraceLayer ─► service routes ─► Result<_, AppError>
//!                       └► /health, /health/ready
//! ```
//!
//! Domain errors carry an [`gym_core::ErrorKind`]; [`AppError::from_kind`]
//! turns that into a status code and a `{"code","message"}` body.
//!
//! # Example
//!
//! ```ignore
//! use gym_web::{AppError, HealthChecks, service_router};
//!
//! let app = service_router(payment_routes(service), HealthChecks::new());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;

use axum::Router;
use tower_http::trace::TraceLayer;

pub use error::{AppError, CAPACITY_CONFLICT, CAPACITY_EXCEEDED};
pub use handlers::{ComponentHealth, HealthCheck, HealthChecks, HealthReport, HealthStatus};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Merge service routes with the health endpoints and wrap them in request
/// tracing.
pub fn service_router(routes: Router, checks: HealthChecks) -> Router {
    routes
        .merge(handlers::health_routes(checks))
        .layer(TraceLayer::new_for_http())
}
