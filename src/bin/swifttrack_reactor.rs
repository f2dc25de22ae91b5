//! Status Reactor process: applies saga outcomes to the order store and
//! runs the notification dispatcher off the back of its own publishes.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use swifttrack::bus::{AmqpConfig, AmqpEventBus, EventBus};
use swifttrack::config::Config;
use swifttrack::notifications::{self, NotificationDispatcher};
use swifttrack::reactor::{self, StatusReactor};
use swifttrack::retry::connect_with_backoff;
use swifttrack::store::{OrderStore, PostgresOrderStore};
use swifttrack::telemetry;

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
        Arc::new(AmqpEventBus::new(AmqpConfig::new(config.rabbitmq_url.clone(), "status-reactor")).await?);

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

    tracing::info!("status reactor and notification dispatcher consuming");
    std::future::pending::<()>().await;
    Ok(())
}
