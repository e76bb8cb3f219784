//! Wiring of each service from its configuration.
//!
//! | Service | Routes | Consumer | Periodic |
//! |---------|--------|----------|----------|
//! | activities | inscriptions, capacity | `subscription.cancelled` → unenroll | |
//! | subscriptions | subscriptions, plans | `payment.*.subscription` → lifecycle | expiry sweep |
//! | payments | payments | | |
//! | search | search, index | `activity/plan/subscription/inscription.*` → index | L1 cache sweep |

use crate::config::{Config, ServiceKind};
use crate::health::{BusHealth, DatabaseHealth};
use anyhow::Context;
use axum::Router;
use gym_activities::{ActivityService, PostgresInscriptionStore, UnenrollHandler, activity_routes};
use gym_core::{EventPublisher, MessageHandler};
use gym_core::environment::SystemClock;
use gym_payments::{PaymentService, PostgresPaymentStore, payment_routes};
use gym_postgres::PgPool;
use gym_rabbitmq::{ConsumerConfig, QueueTopology, RabbitConsumer, connect_publisher};
use gym_runtime::{BackgroundTask, HttpUserDirectory, PeriodicTask, RetryPolicy};
use gym_search::cache::{SWEEP_INTERVAL, sweeper};
use gym_search::solr::DEFAULT_TIMEOUT;
use gym_search::{
    IndexHandler, MemoryIndex, PostgresActivitySource, RedisCache, RemoteCache, SearchService, SearchState,
    SolrClient, TwoTierCache, search_routes,
};
use gym_subscriptions::{PaymentEventHandler, PostgresSubscriptionStore, SubscriptionService, subscription_routes};
use gym_web::HealthChecks;
use std::sync::Arc;

/// A wired service, ready to be served.
pub struct Service {
    /// Service routes, without the health endpoints.
    pub routes: Router,
    /// Readiness checks.
    pub checks: HealthChecks,
    /// Consumers and periodic jobs.
    pub tasks: Vec<Box<dyn BackgroundTask>>,
}

/// Connect the shared dependencies and wire `config.service`.
///
/// # Errors
///
/// Fails if the database stays unreachable through the startup retries, a
/// migration fails, the broker is unreachable in strict mode, or a client
/// cannot be built.
pub async fn build(config: &Config) -> anyhow::Result<Service> {
    let pool = gym_postgres::connect_with_retry(
        &config.database.url,
        config.database.max_connections,
        &RetryPolicy::default(),
    )
    .await
    .context("connecting to the database")?;
    if config.database.run_migrations {
        gym_postgres::migrate(&pool).await.context("running migrations")?;
    }

    let publisher = connect_publisher(&config.bus.url, &config.bus.exchange, config.bus.strict)
        .await
        .context("connecting to the event bus")?;

    let checks = HealthChecks::new()
        .with(Arc::new(DatabaseHealth::new(pool.clone())))
        .with(Arc::new(BusHealth::new(publisher.clone())));

    match config.service {
        ServiceKind::Activities => activities(config, pool, publisher, checks),
        ServiceKind::Subscriptions => subscriptions(config, pool, publisher, checks),
        ServiceKind::Payments => Ok(payments(pool, publisher, checks)),
        ServiceKind::Search => search(config, pool, checks).await,
    }
}

fn consumer(
    config: &Config,
    queue: &str,
    bindings: &[&str],
    handler: Arc<dyn MessageHandler>,
) -> Box<dyn BackgroundTask> {
    let topology = QueueTopology::new(&config.bus.exchange, queue, bindings);
    let consumer_config = ConsumerConfig::new(&config.bus.url, topology).with_prefetch(config.bus.prefetch);
    Box::new(RabbitConsumer::new(consumer_config, handler))
}

fn users(config: &Config) -> anyhow::Result<Arc<HttpUserDirectory>> {
    let directory =
        HttpUserDirectory::new(&config.users.url, config.users.timeout).context("building the users client")?;
    Ok(Arc::new(directory))
}

fn activities(
    config: &Config,
    pool: PgPool,
    publisher: Arc<dyn EventPublisher>,
    checks: HealthChecks,
) -> anyhow::Result<Service> {
    let service = ActivityService::new(
        Arc::new(PostgresInscriptionStore::new(pool)),
        users(config)?,
        publisher,
        Arc::new(SystemClock),
    );
    let unenroll = consumer(
        config,
        &config.bus.activities_queue,
        gym_activities::unenroll::BINDINGS,
        Arc::new(UnenrollHandler::new(service.clone())),
    );

    Ok(Service {
        routes: activity_routes(service),
        checks,
        tasks: vec![unenroll],
    })
}

fn subscriptions(
    config: &Config,
    pool: PgPool,
    publisher: Arc<dyn EventPublisher>,
    checks: HealthChecks,
) -> anyhow::Result<Service> {
    let service = SubscriptionService::new(
        Arc::new(PostgresSubscriptionStore::new(pool)),
        users(config)?,
        publisher,
        Arc::new(SystemClock),
    );
    let payments = consumer(
        config,
        &config.bus.subscriptions_queue,
        gym_subscriptions::payment_handler::BINDINGS,
        Arc::new(PaymentEventHandler::new(service.clone())),
    );

    let sweeper_service = service.clone();
    let expiry = PeriodicTask::new("subscription-expiry", config.expiry_sweep, move || {
        let service = sweeper_service.clone();
        async move {
            match service.expire_overdue().await {
                Ok(0) => {}
                Ok(expired) => tracing::info!(expired, "Expired overdue subscriptions"),
                Err(e) => tracing::warn!(error = %e, "Expiry sweep failed"),
            }
        }
    });

    Ok(Service {
        routes: subscription_routes(service),
        checks,
        tasks: vec![payments, Box::new(expiry)],
    })
}

fn payments(pool: PgPool, publisher: Arc<dyn EventPublisher>, checks: HealthChecks) -> Service {
    let service = PaymentService::new(
        Arc::new(PostgresPaymentStore::new(pool)),
        publisher,
        Arc::new(SystemClock),
    );
    Service {
        routes: payment_routes(service),
        checks,
        tasks: Vec::new(),
    }
}

async fn search(config: &Config, pool: PgPool, checks: HealthChecks) -> anyhow::Result<Service> {
    let solr = SolrClient::new(&config.search.solr_url, DEFAULT_TIMEOUT).context("building the Solr client")?;
    let service = Arc::new(
        SearchService::new(Arc::new(MemoryIndex::new()))
            .with_backend(Arc::new(solr))
            .with_source(Arc::new(PostgresActivitySource::new(pool)))
            .with_reprobe_interval(config.search.reprobe_interval),
    );
    service.initial_index().await;

    let remote: Option<Arc<dyn RemoteCache>> = match RedisCache::connect(&config.cache.redis_url).await {
        Ok(redis) => Some(Arc::new(redis)),
        Err(e) => {
            tracing::warn!(error = %e, "Distributed cache unavailable, using the local tier only");
            None
        }
    };
    let cache = Arc::new(TwoTierCache::new(config.cache.local_ttl, remote, config.cache.ttl));

    let indexer = consumer(
        config,
        &config.bus.search_queue,
        gym_search::indexer::BINDINGS,
        Arc::new(IndexHandler::new(service.clone(), cache.clone())),
    );

    Ok(Service {
        routes: search_routes(SearchState::new(service.clone(), cache.clone())),
        checks: checks.with(service),
        tasks: vec![indexer, Box::new(sweeper(cache, SWEEP_INTERVAL))],
    })
}
