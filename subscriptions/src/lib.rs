//! # Gym Subscriptions
//!
//! Subscription lifecycle driven by payment events.
//!
//! ```text
//! payment.completed.subscription ──► activate / renew ──► subscription.activated
//! payment.failed.subscription    ──► note failure     ──► subscription.payment_failed
//! payment.refunded.subscription  ──► cancel           ──► subscription.cancelled
//! expiry sweeper                 ──► expire           ──► subscription.expired
//! ```
//!
//! Transitions are pure functions in [`lifecycle`]; [`SubscriptionService`]
//! applies them with a compare-and-set on the row version so redelivered and
//! concurrent events converge on the same state.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod lifecycle;
pub mod memory;
pub mod payment_handler;
pub mod postgres;
pub mod routes;
pub mod service;
pub mod store;

pub use error::SubscriptionError;
pub use memory::InMemorySubscriptionStore;
pub use payment_handler::PaymentEventHandler;
pub use postgres::PostgresSubscriptionStore;
pub use routes::subscription_routes;
pub use service::{CancelReason, NewSubscription, SubscriptionService};
pub use store::SubscriptionStore;
