//! In-process topic bus.
//!
//! Mirrors the broker closely enough for workflow tests:
//!
//! - a published message is copied to every bound queue with a matching
//!   pattern (`*` one word, `#` zero or more), or dropped if none match
//! - queued messages are handed to the queue's handler one at a time by
//!   [`InMemoryBus::drain`]
//! - `Requeue` puts the message back at the tail; anything else settles it
//!
//! Publishing never dispatches synchronously, so a handler that publishes
//! (refund → `subscription.cancelled`) does not re-enter the bus.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use gym_core::routing::any_matches;
use gym_core::{Disposition, EventEnvelope, EventPublisher, MessageHandler, OutboundMessage, PublishFuture};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};

/// Default number of deliveries of one message before the bus gives up.
pub const DEFAULT_MAX_DELIVERIES: u32 = 5;

/// One settled (or abandoned) delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    /// Queue the message was delivered from.
    pub queue: String,
    /// Routing key it was published with.
    pub routing_key: String,
    /// What the handler decided.
    pub disposition: Disposition,
    /// 1 for the first delivery, 2 for the first redelivery, ...
    pub attempt: u32,
}

struct Binding {
    queue: String,
    patterns: Vec<String>,
    handler: Arc<dyn MessageHandler>,
}

struct Pending {
    binding: usize,
    message: OutboundMessage,
    attempt: u32,
}

/// In-process stand-in for the topic exchange and its queues.
pub struct InMemoryBus {
    bindings: RwLock<Vec<Binding>>,
    pending: Mutex<VecDeque<Pending>>,
    published: Mutex<Vec<OutboundMessage>>,
    deliveries: Mutex<Vec<DeliveryRecord>>,
    max_deliveries: u32,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    /// Empty bus with [`DEFAULT_MAX_DELIVERIES`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_deliveries(DEFAULT_MAX_DELIVERIES)
    }

    /// Empty bus that abandons a message after `max_deliveries` attempts.
    #[must_use]
    pub fn with_max_deliveries(max_deliveries: u32) -> Self {
        Self {
            bindings: RwLock::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
            published: Mutex::new(Vec::new()),
            deliveries: Mutex::new(Vec::new()),
            max_deliveries: max_deliveries.max(1),
        }
    }

    /// Declare `queue`, bind it to `patterns` and attach its consumer.
    pub fn bind(&self, queue: &str, patterns: &[&str], handler: Arc<dyn MessageHandler>) {
        self.bindings.write().unwrap().push(Binding {
            queue: queue.to_string(),
            patterns: patterns.iter().map(|p| (*p).to_string()).collect(),
            handler,
        });
    }

    /// Publish raw bytes, bypassing envelope serialization.
    pub fn inject(&self, routing_key: &str, payload: &[u8]) {
        self.route(OutboundMessage {
            routing_key: routing_key.to_string(),
            payload: payload.to_vec(),
        });
    }

    fn route(&self, message: OutboundMessage) {
        let bindings = self.bindings.read().unwrap();
        let mut pending = self.pending.lock().unwrap();
        for (index, binding) in bindings.iter().enumerate() {
            let patterns: Vec<&str> = binding.patterns.iter().map(String::as_str).collect();
            if any_matches(&patterns, &message.routing_key) {
                pending.push_back(Pending {
                    binding: index,
                    message: message.clone(),
                    attempt: 1,
                });
            }
        }
        drop(pending);
        drop(bindings);
        self.published.lock().unwrap().push(message);
    }

    /// Deliver until no message is pending. Returns the number of deliveries.
    pub async fn drain(&self) -> usize {
        let mut delivered = 0;
        loop {
            let Some(next) = self.pending.lock().unwrap().pop_front() else {
                return delivered;
            };
            let (queue, handler) = {
                let bindings = self.bindings.read().unwrap();
                let binding = &bindings[next.binding];
                (binding.queue.clone(), Arc::clone(&binding.handler))
            };

            let disposition = handler
                .deliver(&next.message.routing_key, &next.message.payload)
                .await;
            delivered += 1;

            self.deliveries.lock().unwrap().push(DeliveryRecord {
                queue: queue.clone(),
                routing_key: next.message.routing_key.clone(),
                disposition,
                attempt: next.attempt,
            });

            if disposition == Disposition::Requeue {
                if next.attempt < self.max_deliveries {
                    self.pending.lock().unwrap().push_back(Pending {
                        attempt: next.attempt + 1,
                        ..next
                    });
                } else {
                    tracing::warn!(
                        queue = %queue,
                        routing_key = %next.message.routing_key,
                        attempts = next.attempt,
                        "Giving up on requeued message"
                    );
                }
            }
        }
    }

    /// Messages waiting for delivery.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Every message published, in order.
    #[must_use]
    pub fn published(&self) -> Vec<OutboundMessage> {
        self.published.lock().unwrap().clone()
    }

    /// Messages published under `routing_key`.
    #[must_use]
    pub fn count(&self, routing_key: &str) -> usize {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.routing_key == routing_key)
            .count()
    }

    /// Generic envelopes published under `routing_key`.
    #[must_use]
    pub fn envelopes(&self, routing_key: &str) -> Vec<EventEnvelope> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.routing_key == routing_key)
            .filter_map(|m| serde_json::from_slice(&m.payload).ok())
            .collect()
    }

    /// Every delivery so far.
    #[must_use]
    pub fn deliveries(&self) -> Vec<DeliveryRecord> {
        self.deliveries.lock().unwrap().clone()
    }

    /// Deliveries from `queue`.
    #[must_use]
    pub fn deliveries_for(&self, queue: &str) -> Vec<DeliveryRecord> {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.queue == queue)
            .cloned()
            .collect()
    }
}

impl EventPublisher for InMemoryBus {
    fn publish_message(&self, message: OutboundMessage) -> PublishFuture<'_> {
        self.route(message);
        Box::pin(async { Ok(()) })
    }
}
