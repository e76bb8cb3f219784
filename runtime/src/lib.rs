//! # Gym Runtime
//!
//! Process-level plumbing shared by every gym service:
//!
//! - [`lifecycle`]: HTTP serving plus background tasks with cooperative shutdown
//! - [`retry`]: exponential backoff for startup dials and consumer reconnects
//! - [`telemetry`]: `tracing` subscriber setup
//! - [`metrics`]: Prometheus exporter and shared metric names
//! - [`users`]: existence checks against the users service

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod lifecycle;
pub mod metrics;
pub mod retry;
pub mod telemetry;
pub mod users;

pub use lifecycle::{Application, BackgroundTask, PeriodicTask};
pub use retry::{Backoff, RetryPolicy, retry_when};
pub use users::{HttpUserDirectory, PermissiveUserDirectory, UserDirectory, UserLookupError};
