//! # Gym Payments
//!
//! Payment records and the events every other service reacts to.
//!
//! | Operation | Event |
//! |-----------|-------|
//! | create (new idempotency key) | `payment.created.<entity_type>` |
//! | pending → completed | `payment.completed.<entity_type>` |
//! | pending → failed | `payment.failed.<entity_type>` |
//! | completed → refunded | `payment.refunded.<entity_type>` with `metadata.refund_amount` |
//!
//! Replays and same-status updates publish nothing.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod memory;
pub mod postgres;
pub mod routes;
pub mod service;
pub mod store;

pub use error::PaymentError;
pub use memory::InMemoryPaymentStore;
pub use postgres::PostgresPaymentStore;
pub use routes::payment_routes;
pub use service::{NewPayment, PaymentService, Recorded, StatusUpdate};
pub use store::{Inserted, PaymentFilter, PaymentStore};
