//! Publisher that keeps what it is given.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use gym_core::{
    EventBusError, EventEnvelope, EventPublisher, OutboundMessage, PaymentEvent, PublishFuture,
};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Captures published messages for assertions.
///
/// # Example
///
/// ```
/// use gym_testing::RecordingPublisher;
/// use gym_core::EventPublisher;
///
/// # tokio_test::block_on(async {
/// let publisher = RecordingPublisher::new();
/// publisher.publish("activity", "updated", "7", None).await.unwrap();
/// assert_eq!(publisher.routing_keys(), vec!["activity.updated"]);
/// # });
/// ```
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<OutboundMessage>>,
    failing: AtomicBool,
}

impl RecordingPublisher {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A recorder whose publishes fail like a dropped channel.
    #[must_use]
    pub fn failing() -> Self {
        let publisher = Self::default();
        publisher.set_failing(true);
        publisher
    }

    /// Toggle failure mode.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Everything published so far.
    #[must_use]
    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// Routing keys in publish order.
    #[must_use]
    pub fn routing_keys(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.routing_key.clone())
            .collect()
    }

    /// Messages published under `routing_key`.
    #[must_use]
    pub fn count(&self, routing_key: &str) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.routing_key == routing_key)
            .count()
    }

    /// Generic envelopes, skipping anything that does not decode as one.
    #[must_use]
    pub fn envelopes(&self) -> Vec<EventEnvelope> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| !m.routing_key.starts_with("payment."))
            .filter_map(|m| serde_json::from_slice(&m.payload).ok())
            .collect()
    }

    /// Payment events.
    #[must_use]
    pub fn payment_events(&self) -> Vec<PaymentEvent> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.routing_key.starts_with("payment."))
            .filter_map(|m| serde_json::from_slice(&m.payload).ok())
            .collect()
    }

    /// Forget everything recorded.
    pub fn clear(&self) {
        self.messages.lock().unwrap().clear();
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish_message(&self, message: OutboundMessage) -> PublishFuture<'_> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(EventBusError::PublishFailed {
                    routing_key: message.routing_key,
                    reason: "channel closed".to_string(),
                });
            }
            self.messages.lock().unwrap().push(message);
            Ok(())
        })
    }
}
