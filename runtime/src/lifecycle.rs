//! Service lifecycle and cooperative shutdown.
//!
//! Every service process runs the same shape:
//!
//! 1. **Startup**: spawn background tasks (bus consumers, cache sweeper,
//!    expiry sweeper) with a shutdown receiver each
//! 2. **Runtime**: serve HTTP
//! 3. **Shutdown**: on Ctrl+C or SIGTERM the server stops accepting requests,
//!    the shutdown signal is broadcast, and each task gets 10 seconds to finish
//!    its in-flight work
//!
//! # Example
//!
//! ```rust,ignore
//! let (shutdown_tx, _) = broadcast::channel(1);
//! let app = Application::new(listener, router, tasks, shutdown_tx);
//! app.run().await?;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// How long each task may take to stop after the signal.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// A long-lived task that stops when its shutdown receiver fires.
pub trait BackgroundTask: Send {
    /// Name used in logs.
    fn name(&self) -> String;

    /// Spawn onto the runtime.
    fn spawn(self: Box<Self>, shutdown: broadcast::Receiver<()>) -> JoinHandle<()>;
}

type TickFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type TickFn = Box<dyn FnMut() -> TickFuture + Send>;

/// Runs an async closure on a fixed period until shutdown.
pub struct PeriodicTask {
    name: String,
    period: Duration,
    tick: TickFn,
}

impl PeriodicTask {
    /// Create a task calling `tick` every `period` (first call after one period).
    pub fn new<F, Fut>(name: impl Into<String>, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: name.into(),
            period,
            tick: Box::new(move || -> TickFuture { Box::pin(tick()) }),
        }
    }
}

impl BackgroundTask for PeriodicTask {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn spawn(self: Box<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let Self {
            name,
            period,
            mut tick,
        } = *self;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!(task = %name, "Periodic task stopping");
                        break;
                    }
                    _ = interval.tick() => {
                        tick().await;
                    }
                }
            }
        })
    }
}

/// A running service: HTTP router plus background tasks.
pub struct Application {
    listener: tokio::net::TcpListener,
    router: axum::Router,
    tasks: Vec<Box<dyn BackgroundTask>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Application {
    /// Assemble an application.
    #[must_use]
    pub fn new(
        listener: tokio::net::TcpListener,
        router: axum::Router,
        tasks: Vec<Box<dyn BackgroundTask>>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            listener,
            router,
            tasks,
            shutdown_tx,
        }
    }

    /// Run until Ctrl+C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns the server error if serving fails.
    pub async fn run(self) -> std::io::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `signal` resolves.
    ///
    /// # Errors
    ///
    /// Returns the server error if serving fails.
    pub async fn run_until<S>(self, signal: S) -> std::io::Result<()>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let address = self.listener.local_addr()?;

        info!(task_count = self.tasks.len(), "Starting background tasks");
        let handles: Vec<(String, JoinHandle<()>)> = self
            .tasks
            .into_iter()
            .map(|task| {
                let name = task.name();
                let handle = task.spawn(self.shutdown_tx.subscribe());
                (name, handle)
            })
            .collect();

        info!(address = %address, "HTTP server listening");
        let served = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(signal)
            .await;

        info!("HTTP server stopped, initiating graceful shutdown");
        // No receivers left is fine: every task may already have exited
        let _ = self.shutdown_tx.send(());
        await_shutdown(handles).await;

        info!("Graceful shutdown complete");
        served
    }
}

async fn await_shutdown(handles: Vec<(String, JoinHandle<()>)>) {
    for (name, handle) in handles {
        match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
            Ok(Ok(())) => info!(task = %name, "Task stopped gracefully"),
            Ok(Err(e)) => warn!(task = %name, error = %e, "Task failed"),
            Err(_) => warn!(task = %name, "Task shutdown timed out"),
        }
    }
}

/// Resolve on SIGINT (Ctrl+C) or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn periodic_task_ticks_until_shutdown() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let task = PeriodicTask::new("counter", Duration::from_millis(5), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let (tx, rx) = broadcast::channel(1);
        let handle = Box::new(task).spawn(rx);
        tokio::time::sleep(Duration::from_millis(40)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 1, "expected at least one tick, saw {seen}");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen, "no ticks after shutdown");
    }

    #[tokio::test]
    async fn application_stops_tasks_when_signal_fires() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let task: Box<dyn BackgroundTask> = Box::new(PeriodicTask::new(
            "sweeper",
            Duration::from_millis(5),
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        ));
        let (shutdown_tx, _) = broadcast::channel(1);
        let app = Application::new(listener, axum::Router::new(), vec![task], shutdown_tx);

        app.run_until(tokio::time::sleep(Duration::from_millis(30)))
            .await
            .unwrap();

        let seen = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }
}
