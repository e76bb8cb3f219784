//! # Gym Server
//!
//! One binary, four services. The service is picked by the first argument or
//! `GYM_SERVICE`:
//!
//! ```bash
//! gym-server activities
//! GYM_SERVICE=search gym-server
//! ```
//!
//! Every process shares the same shell: configuration from the environment
//! (and `.env`), a database pool with migrations, the event publisher (null
//! publisher when the broker is down), `/health` and `/health/ready`, request
//! tracing, an optional Prometheus exporter, and graceful shutdown of the
//! background consumers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod app;
pub mod config;
pub mod health;

pub use app::{Service, build};
pub use config::{Config, ConfigError, ServiceKind};
