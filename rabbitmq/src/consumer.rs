//! Durable-queue consumer with manual acknowledgement.
//!
//! One consumer owns one queue and processes one delivery at a time:
//!
//! ```text
//! connect ─► declare topology ─► qos(prefetch) ─► basic_consume
//!                                                    │
//!              ┌─────────────────────────────────────┘
//!              ▼
//!      delivery ─► MessageHandler::deliver ─► Disposition ─► ack / nack
//! ```
//!
//! A delivery is never settled before its handler returns. When the
//! connection drops the consumer reconnects with exponential backoff; when the
//! shutdown signal fires it finishes the in-flight delivery, then closes the
//! channel and the connection in that order.

use crate::topology::QueueTopology;
use futures::StreamExt;
use gym_core::{Disposition, EventBusError, MessageHandler};
use gym_runtime::metrics::{EVENTS_CONSUMED, HANDLER_DURATION};
use gym_runtime::{Backoff, BackgroundTask, RetryPolicy};
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Consumer settings.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Broker URL.
    pub url: String,
    /// Queue, exchange and bindings.
    pub topology: QueueTopology,
    /// Unacknowledged deliveries the broker may push at once.
    pub prefetch: u16,
    /// Reconnect backoff.
    pub reconnect: RetryPolicy,
}

impl ConsumerConfig {
    /// Settings with prefetch 1 and a 1s..30s reconnect backoff.
    #[must_use]
    pub fn new(url: &str, topology: QueueTopology) -> Self {
        Self {
            url: url.to_string(),
            topology,
            prefetch: 1,
            reconnect: RetryPolicy::default()
                .with_initial_delay(Duration::from_secs(1))
                .with_max_delay(Duration::from_secs(30)),
        }
    }

    /// Override the prefetch count (minimum 1).
    #[must_use]
    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    /// Override the reconnect backoff.
    #[must_use]
    pub fn with_reconnect(mut self, policy: RetryPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}

/// How a consume session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    StreamClosed,
}

/// A queue consumer run as a [`BackgroundTask`].
pub struct RabbitConsumer {
    config: ConsumerConfig,
    handler: Arc<dyn MessageHandler>,
}

impl RabbitConsumer {
    /// Create a consumer dispatching to `handler`.
    #[must_use]
    pub fn new(config: ConsumerConfig, handler: Arc<dyn MessageHandler>) -> Self {
        Self { config, handler }
    }

    /// Queue this consumer reads.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.config.topology.queue
    }

    /// Consume until shutdown, reconnecting on connection loss.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut backoff = Backoff::new(self.config.reconnect.clone());

        loop {
            match self.session(&mut shutdown, &mut backoff).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::StreamClosed) => {
                    tracing::warn!(queue = %self.queue(), "Delivery stream closed, reconnecting");
                }
                Err(e) => {
                    tracing::warn!(
                        queue = %self.queue(),
                        attempt = backoff.attempts(),
                        error = %e,
                        "Consumer session failed"
                    );
                }
            }

            let delay = backoff.next_delay();
            tokio::select! {
                _ = shutdown.recv() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!(queue = %self.queue(), "Consumer stopped");
    }

    async fn session(
        &self,
        shutdown: &mut broadcast::Receiver<()>,
        backoff: &mut Backoff,
    ) -> Result<SessionEnd, EventBusError> {
        let queue = self.queue().to_string();

        let connection = Connection::connect(&self.config.url, ConnectionProperties::default())
            .await
            .map_err(|e| EventBusError::ConnectionFailed(format!("Failed to connect: {e}")))?;

        let channel = match self.open_channel(&connection).await {
            Ok(channel) => channel,
            Err(e) => {
                close_connection(&connection).await;
                return Err(e);
            }
        };

        let mut deliveries = match channel
            .basic_consume(
                &queue,
                &format!("{queue}-consumer"),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
        {
            Ok(consumer) => consumer,
            Err(e) => {
                close(&channel, &connection).await;
                return Err(EventBusError::SubscriptionFailed {
                    queue,
                    reason: e.to_string(),
                });
            }
        };

        backoff.reset();
        tracing::info!(
            queue = %queue,
            exchange = %self.config.topology.exchange,
            prefetch = self.config.prefetch,
            "Consumer started"
        );

        let end = loop {
            tokio::select! {
                _ = shutdown.recv() => break SessionEnd::Shutdown,
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => self.process(&queue, delivery).await,
                    Some(Err(e)) => {
                        tracing::warn!(queue = %queue, error = %e, "Delivery stream error");
                        break SessionEnd::StreamClosed;
                    }
                    None => break SessionEnd::StreamClosed,
                },
            }
        };

        close(&channel, &connection).await;
        Ok(end)
    }

    async fn open_channel(&self, connection: &Connection) -> Result<Channel, EventBusError> {
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| EventBusError::ConnectionFailed(format!("Failed to open channel: {e}")))?;

        self.config.topology.declare(&channel).await?;

        channel
            .basic_qos(self.config.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| EventBusError::SubscriptionFailed {
                queue: self.queue().to_string(),
                reason: format!("Failed to set prefetch: {e}"),
            })?;

        Ok(channel)
    }

    async fn process(&self, queue: &str, delivery: Delivery) {
        let routing_key = delivery.routing_key.as_str().to_string();
        let started = Instant::now();

        let disposition = self.handler.deliver(&routing_key, &delivery.data).await;

        metrics::histogram!(HANDLER_DURATION, "queue" => queue.to_string())
            .record(started.elapsed().as_secs_f64());
        metrics::counter!(
            EVENTS_CONSUMED,
            "queue" => queue.to_string(),
            "outcome" => disposition.as_str()
        )
        .increment(1);

        let settled = match nack_options(disposition) {
            None => delivery.ack(BasicAckOptions::default()).await,
            Some(options) => delivery.nack(options).await,
        };

        if let Err(e) = settled {
            // The broker redelivers unsettled messages once the channel closes
            tracing::error!(
                queue = %queue,
                routing_key = %routing_key,
                disposition = disposition.as_str(),
                error = %e,
                "Failed to settle delivery"
            );
        }
    }
}

impl BackgroundTask for RabbitConsumer {
    fn name(&self) -> String {
        format!("consumer:{}", self.queue())
    }

    fn spawn(self: Box<Self>, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn((*self).run(shutdown))
    }
}

/// `None` means ack; `Some` carries the nack options.
#[must_use]
pub fn nack_options(disposition: Disposition) -> Option<BasicNackOptions> {
    match disposition {
        Disposition::Ack | Disposition::Ignore => None,
        Disposition::Requeue => Some(BasicNackOptions {
            requeue: true,
            ..BasicNackOptions::default()
        }),
        Disposition::Reject => Some(BasicNackOptions {
            requeue: false,
            ..BasicNackOptions::default()
        }),
    }
}

async fn close(channel: &Channel, connection: &Connection) {
    if let Err(e) = channel.close(200, "consumer closing").await {
        tracing::debug!(error = %e, "Channel already closed");
    }
    close_connection(connection).await;
}

async fn close_connection(connection: &Connection) {
    if let Err(e) = connection.close(200, "consumer closing").await {
        tracing::debug!(error = %e, "Connection already closed");
    }
}
