//! Exchange, queue and binding declarations.
//!
//! Every participant declares what it uses, so startup order between services
//! does not matter:
//!
//! - the exchange is a durable `topic` exchange
//! - each consumer owns a durable, non-exclusive, non-auto-delete queue
//! - each queue is bound once per routing-key pattern
//!
//! Declarations are idempotent on the broker; redeclaring with the same
//! arguments is a no-op.

use gym_core::EventBusError;
use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Channel, ExchangeKind};

/// Queue name plus the patterns it listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    /// Exchange the queue binds to.
    pub exchange: String,
    /// Durable queue name.
    pub queue: String,
    /// Routing-key patterns (`*` one word, `#` zero or more).
    pub bindings: Vec<String>,
}

impl QueueTopology {
    /// Describe a queue bound to `exchange` with `bindings`.
    #[must_use]
    pub fn new(exchange: &str, queue: &str, bindings: &[&str]) -> Self {
        Self {
            exchange: exchange.to_string(),
            queue: queue.to_string(),
            bindings: bindings.iter().map(|b| (*b).to_string()).collect(),
        }
    }

    /// Declare exchange and queue, then bind every pattern.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::TopologyFailed`] naming the object the broker
    /// refused.
    pub async fn declare(&self, channel: &Channel) -> Result<(), EventBusError> {
        if self.bindings.is_empty() {
            return Err(EventBusError::TopologyFailed {
                name: self.queue.clone(),
                reason: "queue has no bindings".to_string(),
            });
        }

        declare_exchange(channel, &self.exchange).await?;

        channel
            .queue_declare(&self.queue, queue_options(), FieldTable::default())
            .await
            .map_err(|e| EventBusError::TopologyFailed {
                name: self.queue.clone(),
                reason: format!("Failed to declare queue: {e}"),
            })?;

        for pattern in &self.bindings {
            channel
                .queue_bind(
                    &self.queue,
                    &self.exchange,
                    pattern,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| EventBusError::TopologyFailed {
                    name: format!("{} -> {pattern}", self.queue),
                    reason: format!("Failed to bind queue: {e}"),
                })?;
        }

        tracing::info!(
            exchange = %self.exchange,
            queue = %self.queue,
            bindings = ?self.bindings,
            "Queue declared and bound"
        );
        Ok(())
    }
}

/// Declare the durable topic exchange.
///
/// # Errors
///
/// Returns [`EventBusError::TopologyFailed`] if the broker refuses the
/// declaration (for example an existing exchange of another kind).
pub async fn declare_exchange(channel: &Channel, exchange: &str) -> Result<(), EventBusError> {
    channel
        .exchange_declare(exchange, ExchangeKind::Topic, exchange_options(), FieldTable::default())
        .await
        .map_err(|e| EventBusError::TopologyFailed {
            name: exchange.to_string(),
            reason: format!("Failed to declare exchange: {e}"),
        })
}

pub(crate) fn exchange_options() -> ExchangeDeclareOptions {
    ExchangeDeclareOptions {
        durable: true,
        ..ExchangeDeclareOptions::default()
    }
}

pub(crate) fn queue_options() -> QueueDeclareOptions {
    QueueDeclareOptions {
        durable: true,
        exclusive: false,
        auto_delete: false,
        ..QueueDeclareOptions::default()
    }
}
