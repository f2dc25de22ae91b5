//! HTTP/WebSocket edge process: order CRUD, driver status updates, and the
//! tracking websocket. Owns the process-local `TrackingHub`.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use swifttrack::bus::{AmqpConfig, AmqpEventBus, EventBus};
use swifttrack::config::Config;
use swifttrack::http::{self, AppState};
use swifttrack::retry::connect_with_backoff;
use swifttrack::store::{OrderStore, PostgresOrderStore};
use swifttrack::telemetry;
use swifttrack::ws::{self, TrackingConsumer, TrackingHub};

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
        Arc::new(AmqpEventBus::new(AmqpConfig::new(config.rabbitmq_url.clone(), "http-gateway")).await?);

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
        source_service: "http-gateway".to_string(),
    };

    let listener = tokio::net::TcpListener::bind(&config.http_bind).await?;
    tracing::info!(addr = %config.http_bind, "http gateway listening");
    axum::serve(listener, http::router(state)).await?;

    Ok(())
}
