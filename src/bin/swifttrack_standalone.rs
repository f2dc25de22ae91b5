//! Standalone process: every component (HTTP/WS edge, saga orchestrator,
//! status reactor, notification dispatcher, tracking consumer) runs as a
//! task inside one binary. Mirrors the teacher's `standalone` runtime mode,
//! where a single process hosts every handler instead of splitting by bin.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use swifttrack::bus::{AmqpConfig, AmqpEventBus, EventBus};
use swifttrack::config::Config;
use swifttrack::http::{self, AppState};
use swifttrack::notifications::{self, NotificationDispatcher};
use swifttrack::reactor::{self, StatusReactor};
use swifttrack::retry::connect_with_backoff;
use swifttrack::saga::{self, SagaOrchestrator};
use swifttrack::store::{OrderStore, PostgresOrderStore};
use swifttrack::telemetry;
use swifttrack::ws::{self, TrackingConsumer, TrackingHub};

const SAGA_QUEUE: &str = "saga_orchestrator.order_created";
const SAGA_ROUTING_KEYS: &[&str] = &["order.created"];
const SAGA_MAX_RETRIES: u64 = 3;
const SAGA_RETRY_TTL_MS: u32 = 30_000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(None)?;
    telemetry::init_tracing(&config);

    let pool = connect_with_backoff("postgres", 10, || {
        PgPoolOptions::new().max_connections(15).connect(&config.database_url)
    })
    .await?;
    let store_impl = PostgresOrderStore::new(pool);
    store_impl.init().await?;
    let store: Arc<dyn OrderStore> = Arc::new(store_impl);

    let bus: Arc<dyn EventBus> =
        Arc::new(AmqpEventBus::new(AmqpConfig::new(config.rabbitmq_url.clone(), "swifttrack-standalone")).await?);

    let saga = Arc::new(SagaOrchestrator::new(&config)?);
    let saga_bus = bus.clone();
    bus.consume_with_retry(
        SAGA_QUEUE,
        SAGA_ROUTING_KEYS,
        Box::new(move |delivery| {
            let saga = saga.clone();
            let bus = saga_bus.clone();
            Box::pin(async move { run_saga_step(&saga, &bus, delivery).await })
        }),
        SAGA_MAX_RETRIES,
        SAGA_RETRY_TTL_MS,
    )
    .await?;

    let status_reactor = Arc::new(StatusReactor::new(store.clone(), bus.clone(), config.driver_roster()));
    bus.consume(
        reactor::QUEUE,
        reactor::ROUTING_KEYS,
        Box::new(move |delivery| {
            let status_reactor = status_reactor.clone();
            Box::pin(async move { status_reactor.handle(delivery).await })
        }),
    )
    .await?;

    let dispatcher = Arc::new(NotificationDispatcher::new(bus.clone()));
    bus.consume(
        notifications::QUEUE,
        notifications::ROUTING_KEYS,
        Box::new(move |delivery| {
            let dispatcher = dispatcher.clone();
            Box::pin(async move { dispatcher.handle(delivery).await })
        }),
    )
    .await?;

    let hub = Arc::new(TrackingHub::new());
    let tracking_consumer = Arc::new(TrackingConsumer::new(hub.clone(), store.clone()));
    bus.consume(
        ws::QUEUE,
        ws::ROUTING_KEYS,
        Box::new(move |delivery| {
            let tracking_consumer = tracking_consumer.clone();
            Box::pin(async move { tracking_consumer.handle(delivery).await })
        }),
    )
    .await?;

    let state = AppState {
        store,
        bus,
        hub,
        driver_roster: config.driver_roster(),
        source_service: "swifttrack-standalone".to_string(),
    };

    let listener = tokio::net::TcpListener::bind(&config.http_bind).await?;
    tracing::info!(addr = %config.http_bind, "swifttrack standalone listening");
    axum::serve(listener, http::router(state)).await?;

    Ok(())
}

async fn run_saga_step(
    saga: &SagaOrchestrator,
    bus: &Arc<dyn EventBus>,
    delivery: swifttrack::bus::Delivery,
) -> Result<(), String> {
    let order_id = delivery
        .body
        .get("order_id")
        .and_then(|v| v.as_str())
        .ok_or("event body missing order_id")?
        .to_string();
    let client_id = delivery.body.get("client_id").and_then(|v| v.as_str()).unwrap_or("");
    let pickup_address = delivery.body.get("pickup_address").and_then(|v| v.as_str()).unwrap_or("");
    let delivery_address = delivery
        .body
        .get("delivery_address")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let package_details = delivery.body.get("package_details").cloned().unwrap_or_default();

    let result = saga
        .run(&order_id, client_id, pickup_address, delivery_address, &package_details)
        .await;

    saga::publish_result(bus.as_ref(), &result, delivery.correlation_id.clone())
        .await
        .map_err(|e| e.to_string())?;

    if !result.success {
        return Err(result.error.unwrap_or_else(|| "saga failed".to_string()));
    }
    Ok(())
}
