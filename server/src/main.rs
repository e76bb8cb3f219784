//! Gym service process.

use anyhow::Context;
use gym_runtime::Application;
use gym_runtime::metrics::MetricsServer;
use gym_runtime::telemetry::init_tracing;
use gym_server::{Config, build};
use gym_web::service_router;
use tokio::sync::broadcast;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("gym=info,tower_http=info");

    let service_arg = std::env::args().nth(1);
    let config = Config::from_env(service_arg.as_deref())?;
    info!(
        service = config.service.as_str(),
        port = config.server.port,
        exchange = %config.bus.exchange,
        "Configuration loaded"
    );

    if let Some(addr) = config.metrics_addr {
        MetricsServer::new(addr).start().context("starting the metrics exporter")?;
    }

    let service = build(&config).await?;
    let router = service_router(service.routes, service.checks);

    let listener = tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| format!("binding {}:{}", config.server.host, config.server.port))?;

    let (shutdown_tx, _) = broadcast::channel(1);
    Application::new(listener, router, service.tasks, shutdown_tx)
        .run()
        .await
        .context("serving HTTP")?;

    info!(service = config.service.as_str(), "Service stopped");
    Ok(())
}
