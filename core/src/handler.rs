//! Consumer-side contract: typed handlers and the acknowledgement policy.
//!
//! Transports hand raw deliveries to [`dispatch`], which decodes the JSON body
//! into the handler's event type, runs the handler, and returns a
//! [`Disposition`] the transport turns into an `ack` or `nack`:
//!
//! | Outcome | Disposition | Broker action |
//! |---------|-------------|---------------|
//! | body does not decode | [`Disposition::Reject`] | `nack(requeue=false)` |
//! | handler `Ok` | [`Disposition::Ack`] | `ack` |
//! | [`HandlerError::Transient`] | [`Disposition::Requeue`] | `nack(requeue=true)` |
//! | [`HandlerError::Permanent`] | [`Disposition::Ignore`] | `ack` + warning |
//!
//! The transport must not settle a delivery before [`dispatch`] returns.

use crate::error::ErrorKind;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Failure reported by a handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Infrastructure failure; the delivery is requeued.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Business payload can never be processed; the delivery is acked.
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl HandlerError {
    /// Map a domain error kind onto the requeue policy.
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        if kind.is_retryable() {
            Self::Transient(message.into())
        } else {
            Self::Permanent(message.into())
        }
    }
}

/// What the transport should do with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Processed; acknowledge.
    Ack,
    /// Unprocessable business payload; acknowledge and move on.
    Ignore,
    /// Retry later; `nack(requeue=true)`.
    Requeue,
    /// Undecodable; `nack(requeue=false)`.
    Reject,
}

impl Disposition {
    /// Whether the delivery leaves the queue for good.
    #[must_use]
    pub const fn settles(self) -> bool {
        !matches!(self, Self::Requeue)
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Ignore => "ignored",
            Self::Requeue => "requeue",
            Self::Reject => "reject",
        }
    }
}

/// Typed event handler.
///
/// One handler instance serves one queue; deliveries are handled one at a
/// time in arrival order.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Decoded message type.
    type Event: DeserializeOwned + Send + Sync;

    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Process one event.
    ///
    /// # Errors
    ///
    /// [`HandlerError::Transient`] to have the delivery redelivered,
    /// [`HandlerError::Permanent`] to drop it with a warning.
    async fn handle(&self, event: &Self::Event) -> Result<(), HandlerError>;
}

/// Decode a raw delivery for `handler`, run it, and decide its disposition.
pub async fn dispatch<H>(handler: &H, routing_key: &str, payload: &[u8]) -> Disposition
where
    H: EventHandler + ?Sized,
{
    let event = match serde_json::from_slice::<H::Event>(payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                handler = handler.name(),
                routing_key = %routing_key,
                error = %e,
                "Rejecting undecodable message"
            );
            return Disposition::Reject;
        }
    };

    match handler.handle(&event).await {
        Ok(()) => {
            tracing::debug!(handler = handler.name(), routing_key = %routing_key, "Event handled");
            Disposition::Ack
        }
        Err(HandlerError::Transient(reason)) => {
            tracing::warn!(
                handler = handler.name(),
                routing_key = %routing_key,
                reason = %reason,
                "Transient handler failure, requeueing"
            );
            Disposition::Requeue
        }
        Err(HandlerError::Permanent(reason)) => {
            tracing::warn!(
                handler = handler.name(),
                routing_key = %routing_key,
                reason = %reason,
                "Permanent handler failure, acknowledging without processing"
            );
            Disposition::Ignore
        }
    }
}

/// Byte-level handler used by transports, so consumers of different event
/// types can sit behind one `Arc<dyn MessageHandler>`.
pub trait MessageHandler: Send + Sync {
    /// Name used in logs.
    fn handler_name(&self) -> &'static str;

    /// Handle one raw delivery.
    fn deliver<'a>(
        &'a self,
        routing_key: &'a str,
        payload: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Disposition> + Send + 'a>>;
}

impl<H: EventHandler> MessageHandler for H {
    fn handler_name(&self) -> &'static str {
        self.name()
    }

    fn deliver<'a>(
        &'a self,
        routing_key: &'a str,
        payload: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Disposition> + Send + 'a>> {
        Box::pin(dispatch(self, routing_key, payload))
    }
}
