//! Notification fan-out: an ambient stub that turns status-change events
//! into a logged "channel" dispatch and republishes a normalized update for
//! other consumers (e.g. the websocket edge).

use std::sync::Arc;

use serde_json::json;

use crate::bus::{Delivery, EventBus};

pub const QUEUE: &str = "notifications.dispatch";
pub const ROUTING_KEYS: &[&str] = &["notification.status_changed"];

/// Placeholder delivery channel; a real deployment would route by client
/// preference (email, SMS, push). This crate only ever picks `Log`.
const CHANNEL: &str = "log";

pub struct NotificationDispatcher {
    bus: Arc<dyn EventBus>,
}

impl NotificationDispatcher {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    #[tracing::instrument(skip(self, delivery))]
    pub async fn handle(&self, delivery: Delivery) -> Result<(), String> {
        let order_id = delivery
            .body
            .get("order_id")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let status = delivery
            .body
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        let message = format!("order {order_id} is now {status}");
        tracing::info!(%order_id, %status, channel = CHANNEL, "dispatching notification");

        let body = json!({
            "event": "notification.order_update",
            "order_id": order_id,
            "status": status,
            "message": message,
            "channel": CHANNEL,
        });

        self.bus
            .publish_event("notification.order_update", &body, Some(delivery.correlation_id))
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}
