//! Saga Orchestrator process: consumes `order.created` and drives each
//! order through CMS → WMS → ROS.

use std::sync::Arc;

use swifttrack::bus::{AmqpConfig, AmqpEventBus, EventBus};
use swifttrack::config::Config;
use swifttrack::saga::{self, SagaOrchestrator};
use swifttrack::telemetry;

const QUEUE: &str = "saga_orchestrator.order_created";
const ROUTING_KEYS: &[&str] = &["order.created"];
const MAX_RETRIES: u64 = 3;
const RETRY_TTL_MS: u32 = 30_000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(None)?;
    telemetry::init_tracing(&config);

    let bus: Arc<dyn EventBus> = Arc::new(
        AmqpEventBus::new(AmqpConfig::new(config.rabbitmq_url.clone(), "saga-orchestrator")).await?,
    );
    let saga = Arc::new(SagaOrchestrator::new(&config)?);

    let handler_bus = bus.clone();
    bus.consume_with_retry(
        QUEUE,
        ROUTING_KEYS,
        Box::new(move |delivery| {
            let saga = saga.clone();
            let bus = handler_bus.clone();
            Box::pin(async move {
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
            })
        }),
        MAX_RETRIES,
        RETRY_TTL_MS,
    )
    .await?;

    tracing::info!(queue = QUEUE, "saga orchestrator consuming");
    std::future::pending::<()>().await;
    Ok(())
}
