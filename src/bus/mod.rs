//! Durable event bus over a single AMQP topic exchange.
//!
//! This module contains the `EventBus` trait, the `BusError` taxonomy, and
//! the AMQP implementation (the only backend this crate carries).

pub mod amqp;

pub use amqp::{AmqpConfig, AmqpEventBus};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

/// Name of the durable topic exchange all event traffic flows through.
pub const EVENTS_EXCHANGE: &str = "swifttrack.events";
/// Name of the dead-letter exchange retry queues attach to.
pub const DLX_EXCHANGE: &str = "swifttrack.dlx";
/// Name of the fanout exchange feeding per-queue DLQs.
pub const DLQ_EXCHANGE: &str = "swifttrack.dlq";

pub type Result<T> = std::result::Result<T, BusError>;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("failed to decode message body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("lapin error: {0}")]
    Lapin(#[from] lapin::Error),

    #[error("pool error: {0}")]
    Pool(#[from] deadpool_lapin::PoolError),
}

/// A decoded message delivered to a `Consume`/`ConsumeWithRetry` handler.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub routing_key: String,
    pub body: Value,
    pub correlation_id: String,
    /// Number of prior redelivery attempts, as recorded by `x-death` for the
    /// consuming queue. Zero on first delivery.
    pub retry_count: u64,
}

/// Handler invoked per delivered message. Returning `Err` signals failure:
/// plain `Consume` requeues, `ConsumeWithRetry` routes through the DLX.
pub type Handler =
    Box<dyn Fn(Delivery) -> BoxFuture<'static, std::result::Result<(), String>> + Send + Sync>;

/// Interface for durable publish/subscribe messaging.
///
/// The only implementation carried by this crate is `AmqpEventBus`; the
/// trait exists so the saga, reactor, and notification components depend
/// on a narrow seam rather than on `lapin` directly.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Plain publish: persistent delivery, no header stamping.
    async fn publish(&self, routing_key: &str, body: &Value) -> Result<()>;

    /// Publish with header stamping (correlation id, request id, timestamp,
    /// event version, source service). Returns the correlation id used.
    async fn publish_event(
        &self,
        routing_key: &str,
        body: &Value,
        correlation_id: Option<String>,
    ) -> Result<String>;

    /// Declare a durable queue bound to `routing_keys` and dispatch each
    /// delivery to `handler`. Auto-acks on success, requeues on failure.
    async fn consume(&self, queue: &str, routing_keys: &[&str], handler: Handler) -> Result<()>;

    /// Same as `consume`, but wraps the queue in the retry/DLQ topology:
    /// failed handlers route through `swifttrack.dlx` into a TTL'd retry
    /// queue, and once `max_retries` is exceeded the message is acked on
    /// the main queue and republished to `swifttrack.dlq`.
    async fn consume_with_retry(
        &self,
        queue: &str,
        routing_keys: &[&str],
        handler: Handler,
        max_retries: u64,
        retry_ttl_ms: u32,
    ) -> Result<()>;
}

/// Headers stamped onto every published event, per §6.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EventHeaders {
    pub correlation_id: String,
    pub request_id: String,
    pub timestamp: String,
    pub event_version: &'static str,
    pub source_service: String,
}

impl EventHeaders {
    pub fn new(correlation_id: String, source_service: impl Into<String>) -> Self {
        Self {
            correlation_id,
            request_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            event_version: "1.0",
            source_service: source_service.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_headers_fresh_request_id_each_call() {
        let a = EventHeaders::new("c1".to_string(), "saga");
        let b = EventHeaders::new("c1".to_string(), "saga");
        assert_ne!(a.request_id, b.request_id);
        assert_eq!(a.correlation_id, b.correlation_id);
        assert_eq!(a.event_version, "1.0");
    }
}
