//! # Gym Activities
//!
//! Inscriptions under capacity and unenrolment on subscription cancellation.
//!
//! Admission is atomic per activity: the store counts active inscriptions and
//! inserts (or reactivates) under one lock, so `N` parallel requests against
//! the last seat yield exactly one `201` and `N - 1` `CAPACITY_EXCEEDED`.
//!
//! Events emitted after each committed write:
//!
//! | Write | Routing key | `id` |
//! |-------|-------------|------|
//! | enrol | `inscription.created` | inscription id |
//! | release / unenrol | `inscription.deleted` | `<usuario_id>_<actividad_id>` |
//! | capacity change | `activity.updated` | activity id |
//!
//! Consumed: `subscription.cancelled` on `activities_subscription_events`
//! (see [`UnenrollHandler`]).

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod memory;
pub mod postgres;
pub mod routes;
pub mod service;
pub mod store;
pub mod unenroll;

pub use error::ActivityError;
pub use memory::InMemoryInscriptionStore;
pub use postgres::PostgresInscriptionStore;
pub use routes::activity_routes;
pub use service::{ActivityService, NewInscription};
pub use store::{Admission, InscriptionStore, Seats};
pub use unenroll::UnenrollHandler;
