//! # Gym Core
//!
//! Contracts shared by every service that takes part in the gym event fabric.
//!
//! The fabric keeps four independent services (activities, subscriptions,
//! payments, search) eventually consistent by exchanging JSON envelopes over a
//! single topic exchange:
//!
//! ```text
//!   write (HTTP) ──► service ──► store ──► EventPublisher ──► gym_events
//!                                                                │
//!                       ┌────────────────────────────────────────┼──────────────┐
//!                       ▼                                        ▼              ▼
//!                 subscriptions                              activities       search
//!                 (payment.*.subscription)            (subscription.cancelled) (activity.* ...)
//! ```
//!
//! This crate owns:
//!
//! - [`envelope`]: the wire format ([`EventEnvelope`], [`PaymentEvent`]) and the
//!   sum types used to dispatch on it
//! - [`routing`]: routing-key grammar, queue names and AMQP topic matching
//! - [`event_bus`]: the [`EventPublisher`] trait and bus errors
//! - [`handler`]: the consumer-side [`EventHandler`] trait and the ack/nack policy
//! - [`error`]: the cross-service error taxonomy ([`ErrorKind`])
//! - [`domain`]: entities referenced by the workflow layer
//!
//! Transport implementations live in `gym-rabbitmq`; in-process doubles live in
//! `gym-testing`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod domain;
pub mod envelope;
pub mod error;
pub mod event_bus;
pub mod handler;
pub mod routing;

pub use envelope::{EntityKind, EventAction, EventEnvelope, PaymentAction, PaymentEvent};
pub use error::ErrorKind;
pub use event_bus::{EventBusError, EventPublisher, OutboundMessage, PublishFuture};
pub use handler::{Disposition, EventHandler, HandlerError, MessageHandler, dispatch};

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Injected environment dependencies.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability.
    ///
    /// Subscription expiry arithmetic and payment timestamps read the time
    /// through this trait so tests can pin it.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
