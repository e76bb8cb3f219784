//! Prometheus metrics for the event fabric.
//!
//! Metric names are constants so every crate records under the same series:
//! - Publisher: published, failed and dropped (null publisher) events
//! - Consumers: deliveries by queue and disposition, handler latency
//! - Search: cache lookups by tier and result, responses by serving layer
//!
//! # Example
//!
//! ```rust,no_run
//! use gym_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use thiserror::Error;

/// Events handed to the broker (label: `routing_key`).
pub const EVENTS_PUBLISHED: &str = "gym_events_published_total";
/// Publishes the broker rejected.
pub const EVENTS_PUBLISH_FAILED: &str = "gym_events_publish_failed_total";
/// Events swallowed by the null publisher.
pub const EVENTS_DROPPED: &str = "gym_events_dropped_total";
/// Deliveries settled by consumers (labels: `queue`, `outcome`).
pub const EVENTS_CONSUMED: &str = "gym_events_consumed_total";
/// Handler latency (label: `queue`).
pub const HANDLER_DURATION: &str = "gym_consumer_handle_duration_seconds";
/// Search cache lookups (labels: `tier`, `result`).
pub const SEARCH_CACHE: &str = "gym_search_cache_total";
/// Search responses by serving layer (label: `source`).
pub const SEARCH_SERVED: &str = "gym_search_served_total";

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build the exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install the exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus exporter serving `/metrics` on its own listener.
pub struct MetricsServer {
    addr: SocketAddr,
    started: bool,
}

impl MetricsServer {
    /// Create an exporter bound to `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            started: false,
        }
    }

    /// Install the global recorder and start the HTTP listener.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or a recorder
    /// is already installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .install()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        self.started = true;
        tracing::info!(addr = %self.addr, "Metrics exporter listening");
        Ok(())
    }

    /// Whether [`start`](Self::start) succeeded.
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.started
    }
}

fn register_metrics() {
    describe_counter!(EVENTS_PUBLISHED, "Events handed to the broker");
    describe_counter!(EVENTS_PUBLISH_FAILED, "Publishes rejected by the broker");
    describe_counter!(EVENTS_DROPPED, "Events dropped while the bus was unavailable");
    describe_counter!(EVENTS_CONSUMED, "Deliveries settled by consumers");
    describe_histogram!(HANDLER_DURATION, "Time spent handling one delivery");
    describe_counter!(SEARCH_CACHE, "Search cache lookups");
    describe_counter!(SEARCH_SERVED, "Search responses by serving layer");
}
