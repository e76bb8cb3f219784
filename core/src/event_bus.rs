//! Publisher side of the event bus.
//!
//! Services publish after their store write has committed:
//!
//! ```text
//! ┌─────────────────┐
//! │ 1. Write store  │◄─── Source of truth
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ 2. Publish to   │◄─── Fire-and-forget, no retry
//! │    gym_events   │
//! └────────┬────────┘
//!          │
//!     ┌────┴─────┬──────────┐
//!     ▼          ▼          ▼
//! ┌───────┐ ┌──────────┐ ┌────────┐
//! │search │ │activities│ │subscr. │
//! └───────┘ └──────────┘ └────────┘
//! ```
//!
//! # Key Principles
//!
//! - **Store first**: the write is committed before the event is emitted
//! - **At-least-once delivery** on the consumer side; consumers are idempotent
//! - **Degradation**: when the broker is unreachable at startup a null
//!   publisher is substituted so writes are never blocked; events emitted in
//!   that window are lost and repaired by re-indexing
//!
//! # Implementations
//!
//! - `RabbitPublisher` / `NullPublisher` in `gym-rabbitmq` for production
//! - `RecordingPublisher` in `gym-testing` for tests
//!
//! # Example
//!
//! ```rust,ignore
//! use gym_core::event_bus::EventPublisher;
//! use serde_json::json;
//!
//! async fn example(publisher: &dyn EventPublisher) -> Result<(), gym_core::EventBusError> {
//!     publisher
//!         .publish("activity", "updated", "7", Some(json!({ "cupo": 20 })))
//!         .await
//! }
//! ```

use crate::envelope::{EventEnvelope, PaymentEvent};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    /// Broker unreachable and the publisher is configured strict
    #[error("Event bus unavailable: {0}")]
    BusUnavailable(String),

    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Exchange or queue declaration failed
    #[error("Topology declaration failed for '{name}': {reason}")]
    TopologyFailed {
        /// Exchange or queue name
        name: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to publish a message
    #[error("Publish failed for routing key '{routing_key}': {reason}")]
    PublishFailed {
        /// The routing key that failed
        routing_key: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to start consuming a queue
    #[error("Subscription failed for queue '{queue}': {reason}")]
    SubscriptionFailed {
        /// The queue that failed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to serialize an event
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Failed to ack or nack a delivery
    #[error("Acknowledgement failed: {0}")]
    AckFailed(String),
}

/// Future returned by publish operations.
pub type PublishFuture<'a> = Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + 'a>>;

/// A serialized message ready for the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Routing key used by the topic exchange.
    pub routing_key: String,
    /// JSON body.
    pub payload: Vec<u8>,
}

impl OutboundMessage {
    /// Serialize a generic envelope, routed `<type>.<action>`.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SerializationFailed`] if JSON encoding fails.
    pub fn from_envelope(envelope: &EventEnvelope) -> Result<Self, EventBusError> {
        let payload = serde_json::to_vec(envelope)
            .map_err(|e| EventBusError::SerializationFailed(e.to_string()))?;
        Ok(Self {
            routing_key: envelope.routing_key(),
            payload,
        })
    }

    /// Serialize a payment event, routed `payment.<action>.<entity_type>`.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SerializationFailed`] if JSON encoding fails.
    pub fn from_payment(event: &PaymentEvent) -> Result<Self, EventBusError> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| EventBusError::SerializationFailed(e.to_string()))?;
        Ok(Self {
            routing_key: event.routing_key(),
            payload,
        })
    }
}

/// Trait for publisher implementations.
///
/// Only [`publish_message`](EventPublisher::publish_message) is required; the
/// envelope helpers serialize and delegate to it.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures instead of using `async fn` so services can
/// hold an `Arc<dyn EventPublisher>` chosen at startup (live or null).
pub trait EventPublisher: Send + Sync {
    /// Publish an already serialized message.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the broker rejects the
    /// message. Publishers never retry.
    fn publish_message(&self, message: OutboundMessage) -> PublishFuture<'_>;

    /// Whether messages actually reach a broker.
    fn is_live(&self) -> bool {
        true
    }

    /// Build an envelope and publish it under `<kind>.<action>`.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SerializationFailed`] or any error of
    /// [`publish_message`](EventPublisher::publish_message).
    fn publish(
        &self,
        kind: &str,
        action: &str,
        id: &str,
        data: Option<Value>,
    ) -> PublishFuture<'_> {
        let envelope = EventEnvelope::new(kind, action, id, data);
        self.publish_envelope(&envelope)
    }

    /// Publish a prepared envelope.
    ///
    /// # Errors
    ///
    /// See [`publish`](EventPublisher::publish).
    fn publish_envelope(&self, envelope: &EventEnvelope) -> PublishFuture<'_> {
        match OutboundMessage::from_envelope(envelope) {
            Ok(message) => self.publish_message(message),
            Err(e) => Box::pin(async move { Err::<(), EventBusError>(e) }),
        }
    }

    /// Publish a payment event under `payment.<action>.<entity_type>`.
    ///
    /// # Errors
    ///
    /// See [`publish`](EventPublisher::publish).
    fn publish_payment(&self, event: &PaymentEvent) -> PublishFuture<'_> {
        match OutboundMessage::from_payment(event) {
            Ok(message) => self.publish_message(message),
            Err(e) => Box::pin(async move { Err::<(), EventBusError>(e) }),
        }
    }
}
