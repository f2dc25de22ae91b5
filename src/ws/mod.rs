//! WebSocket tracking edge: per-client session registry and fan-out.
//!
//! Corrected from the original system's broadcast-to-all behavior — each
//! notification is routed only to the sessions registered under the
//! order's own `client_id`, looked up from the Order Store.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::bus::Delivery;
use crate::store::OrderStore;

pub const QUEUE: &str = "ws_tracking.fanout";
pub const ROUTING_KEYS: &[&str] = &["notification.order_update", "notification.status_changed"];

/// Process-local mapping from `client_id` to its open sessions. Mutated
/// only on accept/disconnect, iterated (and pruned) on fan-out.
#[derive(Default)]
pub struct TrackingHub {
    sessions: RwLock<HashMap<String, Vec<UnboundedSender<String>>>>,
}

impl TrackingHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, client_id: String, sender: UnboundedSender<String>) {
        self.sessions.write().await.entry(client_id).or_default().push(sender);
    }

    /// Removes every closed sender for `client_id`. Cheap to call on
    /// disconnect; also happens implicitly during fan-out.
    pub async fn prune(&self, client_id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(senders) = sessions.get_mut(client_id) {
            senders.retain(|tx| !tx.is_closed());
            if senders.is_empty() {
                sessions.remove(client_id);
            }
        }
    }

    /// Sends `message` to every live session registered under `client_id`.
    /// Dead senders discovered here are dropped before returning.
    pub async fn send_to_client(&self, client_id: &str, message: String) {
        let mut sessions = self.sessions.write().await;
        if let Some(senders) = sessions.get_mut(client_id) {
            senders.retain(|tx| tx.send(message.clone()).is_ok());
            if senders.is_empty() {
                sessions.remove(client_id);
            }
        }
    }

    #[cfg(test)]
    async fn session_count(&self, client_id: &str) -> usize {
        self.sessions
            .read()
            .await
            .get(client_id)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

/// Bridges bus notifications to the `TrackingHub`: looks up the order's
/// `client_id` and forwards only to that client's sessions.
pub struct TrackingConsumer {
    hub: Arc<TrackingHub>,
    store: Arc<dyn OrderStore>,
}

impl TrackingConsumer {
    pub fn new(hub: Arc<TrackingHub>, store: Arc<dyn OrderStore>) -> Self {
        Self { hub, store }
    }

    #[tracing::instrument(skip(self, delivery))]
    pub async fn handle(&self, delivery: Delivery) -> Result<(), String> {
        let Some(order_id_str) = delivery.body.get("order_id").and_then(|v| v.as_str()) else {
            return Ok(());
        };
        let Ok(order_id) = order_id_str.parse::<Uuid>() else {
            return Ok(());
        };

        let order = self.store.get(order_id).await.map_err(|e| e.to_string())?;
        let Some(order) = order else { return Ok(()) };

        let payload = json!({
            "event": delivery.routing_key,
            "order_id": order_id_str,
            "status": order.order.status.as_wire(),
            "body": delivery.body,
        })
        .to_string();

        self.hub.send_to_client(&order.order.client_id, payload).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn test_send_to_client_reaches_only_that_client() {
        let hub = TrackingHub::new();
        let (tx_a, mut rx_a) = unbounded_channel();
        let (tx_b, mut rx_b) = unbounded_channel();
        hub.register("client-a".to_string(), tx_a).await;
        hub.register("client-b".to_string(), tx_b).await;

        hub.send_to_client("client-a", "hello".to_string()).await;

        assert_eq!(rx_a.try_recv().unwrap(), "hello");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dead_session_pruned_on_send() {
        let hub = TrackingHub::new();
        let (tx, rx) = unbounded_channel();
        hub.register("client-a".to_string(), tx).await;
        drop(rx);

        hub.send_to_client("client-a", "hello".to_string()).await;
        assert_eq!(hub.session_count("client-a").await, 0);
    }

    #[tokio::test]
    async fn test_unknown_client_is_a_noop() {
        let hub = TrackingHub::new();
        hub.send_to_client("ghost", "hello".to_string()).await;
        assert_eq!(hub.session_count("ghost").await, 0);
    }
}
