//! AMQP (RabbitMQ) event bus implementation.
//!
//! Uses a single topic exchange (`swifttrack.events`) for routing, and
//! implements the retry/DLQ topology described in the module root for
//! `consume_with_retry`.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_lapin::{Config as PoolConfig, Pool, Runtime};
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, ExchangeKind};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::{
    BusError, Delivery, EventBus, EventHeaders, Handler, Result, DLQ_EXCHANGE, DLX_EXCHANGE, EVENTS_EXCHANGE,
};
use crate::retry::connect_with_fixed_delay;

const CONNECT_MAX_ATTEMPTS: u32 = 30;
const CONNECT_DELAY: Duration = Duration::from_secs(2);
const CONSUMER_PREFETCH: u16 = 10;

/// AMQP connection + exchange topology configuration.
#[derive(Debug, Clone)]
pub struct AmqpConfig {
    pub url: String,
    /// Stamped into the `source_service` event header.
    pub source_service: String,
}

impl AmqpConfig {
    pub fn new(url: impl Into<String>, source_service: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            source_service: source_service.into(),
        }
    }
}

/// RabbitMQ-backed `EventBus`.
pub struct AmqpEventBus {
    pool: Pool,
    source_service: String,
}

impl AmqpEventBus {
    /// Connect to the broker (fixed 2-second retry spacing, at least 30
    /// attempts) and declare the durable topic exchange.
    pub async fn new(config: AmqpConfig) -> Result<Self> {
        let pool_config = PoolConfig {
            url: Some(config.url.clone()),
            ..Default::default()
        };
        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| BusError::Connection(e.to_string()))?;

        let channel = connect_with_fixed_delay(
            "rabbitmq",
            CONNECT_MAX_ATTEMPTS,
            CONNECT_DELAY,
            || async {
                let conn = pool.get().await.map_err(|e| e.to_string())?;
                conn.create_channel().await.map_err(|e| e.to_string())
            },
        )
        .await
        .map_err(BusError::Connection)?;

        channel
            .exchange_declare(
                EVENTS_EXCHANGE,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!(exchange = EVENTS_EXCHANGE, "declared events exchange");

        Ok(Self {
            pool,
            source_service: config.source_service,
        })
    }

    async fn get_channel(&self) -> Result<Channel> {
        let conn = self.pool.get().await?;
        Ok(conn.create_channel().await?)
    }

    async fn publish_raw(&self, routing_key: &str, payload: &[u8], properties: BasicProperties) -> Result<()> {
        let channel = self.get_channel().await?;
        channel
            .basic_publish(EVENTS_EXCHANGE, routing_key, BasicPublishOptions::default(), payload, properties)
            .await?
            .await?;
        Ok(())
    }
}

/// Builds the AMQP header table `publish_event` stamps onto a message,
/// mirroring the correlation/request/timestamp/version/source fields
/// `shared/rabbitmq.py` sets as real message headers.
fn event_headers_to_amqp(headers: &EventHeaders) -> FieldTable {
    let mut table = FieldTable::default();
    table.insert("correlation_id".into(), AMQPValue::LongString(headers.correlation_id.clone().into()));
    table.insert("request_id".into(), AMQPValue::LongString(headers.request_id.clone().into()));
    table.insert("timestamp".into(), AMQPValue::LongString(headers.timestamp.clone().into()));
    table.insert("event_version".into(), AMQPValue::LongString(headers.event_version.into()));
    table.insert("source_service".into(), AMQPValue::LongString(headers.source_service.clone().into()));
    table
}

/// Extracts the correlation id for a delivered message, in the order the
/// spec's header extraction falls back: the `correlation_id` AMQP header
/// (set by `publish_event`), then the AMQP `correlation_id` message
/// property (set by any other AMQP client, including the original
/// service), then a `correlation_id` field inside the JSON body, then a
/// freshly minted id.
fn decode_delivery_body(data: &[u8], properties: &BasicProperties) -> Result<(Value, String)> {
    let body: Value = serde_json::from_slice(data)?;

    let header_correlation_id = properties.headers().as_ref().and_then(|headers| {
        match headers.inner().get("correlation_id") {
            Some(AMQPValue::LongString(s)) => Some(s.to_string()),
            _ => None,
        }
    });

    let property_correlation_id = properties.correlation_id().as_ref().map(|id| id.as_str().to_string());

    let body_correlation_id = body.get("correlation_id").and_then(Value::as_str).map(str::to_string);

    let correlation_id = header_correlation_id
        .or(property_correlation_id)
        .or(body_correlation_id)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    Ok((body, correlation_id))
}

/// Reads the retry count for `queue` out of the broker-maintained `x-death`
/// header array, matching the semantics of the original client's
/// `_get_retry_count`: the entry whose `queue` field equals the consumer's
/// main queue, or zero if absent.
fn retry_count_from_headers(headers: Option<&FieldTable>, queue: &str) -> u64 {
    let Some(headers) = headers else { return 0 };
    let Some(AMQPValue::FieldArray(deaths)) = headers.inner().get("x-death") else {
        return 0;
    };
    for entry in deaths.as_slice() {
        if let AMQPValue::FieldTable(table) = entry {
            let matches_queue = matches!(
                table.inner().get("queue"),
                Some(AMQPValue::LongString(q)) if q.as_str() == queue
            );
            if matches_queue {
                if let Some(AMQPValue::LongLongInt(count)) = table.inner().get("count") {
                    return (*count).max(0) as u64;
                }
            }
        }
    }
    0
}

#[async_trait]
impl EventBus for AmqpEventBus {
    async fn publish(&self, routing_key: &str, body: &Value) -> Result<()> {
        let payload = serde_json::to_vec(body)?;
        self.publish_raw(routing_key, &payload, BasicProperties::default().with_delivery_mode(2))
            .await?;
        debug!(routing_key, "published");
        Ok(())
    }

    async fn publish_event(
        &self,
        routing_key: &str,
        body: &Value,
        correlation_id: Option<String>,
    ) -> Result<String> {
        let headers = EventHeaders::new(
            correlation_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            self.source_service.clone(),
        );

        let payload = serde_json::to_vec(body)?;
        let properties = BasicProperties::default()
            .with_delivery_mode(2)
            .with_correlation_id(headers.correlation_id.clone().into())
            .with_headers(event_headers_to_amqp(&headers));

        self.publish_raw(routing_key, &payload, properties).await?;
        debug!(routing_key, correlation_id = %headers.correlation_id, "published");
        Ok(headers.correlation_id)
    }

    async fn consume(&self, queue: &str, routing_keys: &[&str], handler: Handler) -> Result<()> {
        let channel = self.get_channel().await?;
        channel
            .basic_qos(CONSUMER_PREFETCH, BasicQosOptions::default())
            .await?;

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        for key in routing_keys {
            channel
                .queue_bind(queue, EVENTS_EXCHANGE, key, QueueBindOptions::default(), FieldTable::default())
                .await?;
        }

        let mut consumer = channel
            .basic_consume(
                queue,
                &format!("{queue}-consumer"),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                let Ok(delivery) = delivery else {
                    error!("delivery error on consumer");
                    continue;
                };
                let routing_key = delivery.routing_key.as_str().to_string();
                let (body, correlation_id) = match decode_delivery_body(&delivery.data, &delivery.properties) {
                    Ok(v) => v,
                    Err(e) => {
                        error!(error = %e, "failed to decode delivery, dropping");
                        let _ = delivery.ack(BasicAckOptions::default()).await;
                        continue;
                    }
                };
                let msg = Delivery {
                    routing_key,
                    body,
                    correlation_id,
                    retry_count: 0,
                };
                match handler(msg).await {
                    Ok(()) => {
                        let _ = delivery.ack(BasicAckOptions::default()).await;
                    }
                    Err(err) => {
                        warn!(error = %err, "handler failed, requeuing");
                        let _ = delivery
                            .nack(BasicNackOptions {
                                requeue: true,
                                ..Default::default()
                            })
                            .await;
                    }
                }
            }
        });

        Ok(())
    }

    async fn consume_with_retry(
        &self,
        queue: &str,
        routing_keys: &[&str],
        handler: Handler,
        max_retries: u64,
        retry_ttl_ms: u32,
    ) -> Result<()> {
        let channel = self.get_channel().await?;
        channel
            .basic_qos(CONSUMER_PREFETCH, BasicQosOptions::default())
            .await?;

        channel
            .exchange_declare(
                DLX_EXCHANGE,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .exchange_declare(
                DLQ_EXCHANGE,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        let retry_queue = format!("{queue}.retry");
        let dlq_queue = format!("{queue}.dlq");

        let mut retry_args = FieldTable::default();
        retry_args.insert("x-message-ttl".into(), AMQPValue::LongUInt(retry_ttl_ms));
        retry_args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(EVENTS_EXCHANGE.into()),
        );
        channel
            .queue_declare(
                &retry_queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                retry_args,
            )
            .await?;
        for key in routing_keys {
            channel
                .queue_bind(&retry_queue, DLX_EXCHANGE, key, QueueBindOptions::default(), FieldTable::default())
                .await?;
        }

        channel
            .queue_declare(
                &dlq_queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_bind(&dlq_queue, DLQ_EXCHANGE, "", QueueBindOptions::default(), FieldTable::default())
            .await?;

        let mut main_args = FieldTable::default();
        main_args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(DLX_EXCHANGE.into()),
        );
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                main_args,
            )
            .await?;
        for key in routing_keys {
            channel
                .queue_bind(queue, EVENTS_EXCHANGE, key, QueueBindOptions::default(), FieldTable::default())
                .await?;
        }

        let mut consumer = channel
            .basic_consume(
                queue,
                &format!("{queue}-consumer"),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let queue_owned = queue.to_string();
        let service_name = self.source_service.clone();
        let publish_channel = channel.clone();

        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                let Ok(delivery) = delivery else {
                    error!("delivery error on consumer");
                    continue;
                };
                let routing_key = delivery.routing_key.as_str().to_string();
                let retry_count = retry_count_from_headers(delivery.properties.headers().as_ref(), &queue_owned);

                let (body, correlation_id) = match decode_delivery_body(&delivery.data, &delivery.properties) {
                    Ok(v) => v,
                    Err(e) => {
                        error!(error = %e, "failed to decode delivery, dropping");
                        let _ = delivery.ack(BasicAckOptions::default()).await;
                        continue;
                    }
                };
                let msg = Delivery {
                    routing_key: routing_key.clone(),
                    body,
                    correlation_id,
                    retry_count,
                };

                match handler(msg).await {
                    Ok(()) => {
                        let _ = delivery.ack(BasicAckOptions::default()).await;
                    }
                    Err(err) if retry_count >= max_retries => {
                        warn!(
                            queue = %queue_owned,
                            retry_count,
                            max_retries,
                            error = %err,
                            "retries exhausted, routing to dead-letter queue"
                        );
                        let _ = delivery.ack(BasicAckOptions::default()).await;

                        let mut dlq_headers = FieldTable::default();
                        dlq_headers.insert(
                            "x-original-routing-key".into(),
                            AMQPValue::LongString(routing_key.clone().into()),
                        );
                        dlq_headers.insert(
                            "x-retry-count".into(),
                            AMQPValue::LongLongInt(retry_count as i64),
                        );
                        dlq_headers.insert(
                            "x-service".into(),
                            AMQPValue::LongString(service_name.clone().into()),
                        );

                        let props = BasicProperties::default()
                            .with_delivery_mode(2)
                            .with_headers(dlq_headers);

                        if let Err(e) = publish_channel
                            .basic_publish(
                                DLQ_EXCHANGE,
                                "",
                                BasicPublishOptions::default(),
                                &delivery.data,
                                props,
                            )
                            .await
                        {
                            error!(error = %e, "failed to publish to dead-letter exchange");
                        }
                    }
                    Err(err) => {
                        debug!(
                            queue = %queue_owned,
                            retry_count,
                            error = %err,
                            "handler failed, routing to retry queue"
                        );
                        let _ = delivery
                            .nack(BasicNackOptions {
                                requeue: false,
                                ..Default::default()
                            })
                            .await;
                    }
                }
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::types::FieldArray;

    #[test]
    fn test_event_headers_to_amqp_carries_all_fields() {
        let headers = EventHeaders::new("corr-1".to_string(), "saga-orchestrator");
        let table = event_headers_to_amqp(&headers);
        assert_eq!(
            table.inner().get("correlation_id"),
            Some(&AMQPValue::LongString("corr-1".into()))
        );
        assert_eq!(
            table.inner().get("source_service"),
            Some(&AMQPValue::LongString("saga-orchestrator".into()))
        );
        assert!(table.inner().get("request_id").is_some());
        assert!(table.inner().get("timestamp").is_some());
    }

    #[test]
    fn test_amqp_config_new() {
        let config = AmqpConfig::new("amqp://localhost:5672", "saga-orchestrator");
        assert_eq!(config.url, "amqp://localhost:5672");
        assert_eq!(config.source_service, "saga-orchestrator");
    }

    #[test]
    fn test_retry_count_from_headers_absent_is_zero() {
        assert_eq!(retry_count_from_headers(None, "q"), 0);
    }

    #[test]
    fn test_retry_count_from_headers_matches_queue() {
        let mut death_entry = FieldTable::default();
        death_entry.insert("queue".into(), AMQPValue::LongString("order_service.status_updates".into()));
        death_entry.insert("count".into(), AMQPValue::LongLongInt(2));

        let mut deaths = FieldArray::default();
        deaths.push(AMQPValue::FieldTable(death_entry));

        let mut headers = FieldTable::default();
        headers.insert("x-death".into(), AMQPValue::FieldArray(deaths));

        assert_eq!(retry_count_from_headers(Some(&headers), "order_service.status_updates"), 2);
        assert_eq!(retry_count_from_headers(Some(&headers), "other_queue"), 0);
    }

    #[test]
    fn test_decode_delivery_body_mints_id_when_nothing_set() {
        let data = br#"{"event":"order.created","order_id":"abc"}"#;
        let (_, correlation_id) = decode_delivery_body(data, &BasicProperties::default()).unwrap();
        assert!(!correlation_id.is_empty());
    }

    #[test]
    fn test_decode_delivery_body_falls_back_to_body_field() {
        let data = br#"{"event":"order.created","correlation_id":"from-body"}"#;
        let (_, correlation_id) = decode_delivery_body(data, &BasicProperties::default()).unwrap();
        assert_eq!(correlation_id, "from-body");
    }

    #[test]
    fn test_decode_delivery_body_prefers_amqp_property_over_body() {
        let data = br#"{"event":"order.created","correlation_id":"from-body"}"#;
        let properties = BasicProperties::default().with_correlation_id("from-property".into());
        let (_, correlation_id) = decode_delivery_body(data, &properties).unwrap();
        assert_eq!(correlation_id, "from-property");
    }

    #[test]
    fn test_decode_delivery_body_prefers_amqp_header_over_property_and_body() {
        let data = br#"{"event":"order.created","correlation_id":"from-body"}"#;
        let mut headers = FieldTable::default();
        headers.insert("correlation_id".into(), AMQPValue::LongString("from-header".into()));
        let properties = BasicProperties::default()
            .with_correlation_id("from-property".into())
            .with_headers(headers);
        let (_, correlation_id) = decode_delivery_body(data, &properties).unwrap();
        assert_eq!(correlation_id, "from-header");
    }

    // Integration tests requiring a live RabbitMQ broker are not included
    // here; run them against a local broker with `AMQP_URL` set.
}
