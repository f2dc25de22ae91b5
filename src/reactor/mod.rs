//! Status Reactor: applies saga outcomes to the order store and triggers
//! pickup auto-assignment once an order becomes `READY`.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::assigner::{self, Phase};
use crate::bus::{Delivery, EventBus};
use crate::store::{OrderStatus, OrderStore, TransitionFields};

pub const QUEUE: &str = "order_service.status_updates";
pub const ROUTING_KEYS: &[&str] = &[
    "order.cms_registered",
    "order.wms_received",
    "order.route_optimized",
    "order.saga_failed",
];

pub struct StatusReactor {
    store: Arc<dyn OrderStore>,
    bus: Arc<dyn EventBus>,
    driver_roster: Vec<String>,
}

impl StatusReactor {
    pub fn new(store: Arc<dyn OrderStore>, bus: Arc<dyn EventBus>, driver_roster: Vec<String>) -> Self {
        Self {
            store,
            bus,
            driver_roster,
        }
    }

    /// Applies one delivered event. Returns `Err` to signal the caller
    /// should let the broker redeliver (the reactor's own queue carries no
    /// retry wrapper, so this only happens on transient store/bus errors).
    #[tracing::instrument(skip(self, delivery), fields(routing_key = %delivery.routing_key))]
    pub async fn handle(&self, delivery: Delivery) -> Result<(), String> {
        let order_id = delivery
            .body
            .get("order_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "event body missing order_id".to_string())?;
        let order_id: Uuid = order_id.parse().map_err(|e| format!("invalid order_id: {e}"))?;

        let (new_status, fields, details) = match delivery.routing_key.as_str() {
            "order.cms_registered" => {
                let reference = delivery.body.get("cms_reference").and_then(|v| v.as_str());
                (
                    OrderStatus::CmsRegistered,
                    TransitionFields {
                        cms_reference: reference.map(|s| s.to_string()),
                        ..Default::default()
                    },
                    "CMS registered".to_string(),
                )
            }
            "order.wms_received" => {
                let reference = delivery.body.get("wms_reference").and_then(|v| v.as_str());
                (
                    OrderStatus::WmsReceived,
                    TransitionFields {
                        wms_reference: reference.map(|s| s.to_string()),
                        ..Default::default()
                    },
                    "WMS received package".to_string(),
                )
            }
            "order.route_optimized" => {
                let route_id = delivery.body.get("route_id").and_then(|v| v.as_str());
                (
                    OrderStatus::Ready,
                    TransitionFields {
                        route_id: route_id.map(|s| s.to_string()),
                        ..Default::default()
                    },
                    "route optimized, ready for pickup".to_string(),
                )
            }
            "order.saga_failed" => {
                let error = delivery
                    .body
                    .get("error")
                    .and_then(|v| v.as_str())
                    .unwrap_or("saga failed")
                    .to_string();
                (OrderStatus::Failed, TransitionFields::default(), error)
            }
            other => {
                tracing::warn!(routing_key = other, "status reactor has no handling for this routing key, acking");
                return Ok(());
            }
        };

        let updated = self
            .store
            .transition(order_id, new_status, Some(&details), fields)
            .await
            .map_err(|e| e.to_string())?;

        let Some(updated) = updated else {
            return Err(format!("order {order_id} not found for transition"));
        };

        self.publish_status_changed(&updated.id.to_string(), new_status, None)
            .await
            .map_err(|e| e.to_string())?;

        if new_status == OrderStatus::Ready {
            if let Some(driver_id) = assigner::select_driver(&*self.store, &self.driver_roster, Phase::Pickup)
                .await
                .map_err(|e| e.to_string())?
            {
                let fields = TransitionFields {
                    pickup_driver_id: Some(driver_id.clone()),
                    ..Default::default()
                };
                let details = format!("auto-assigned to {driver_id}");
                if let Some(order) = self
                    .store
                    .transition(order_id, OrderStatus::PickupAssigned, Some(&details), fields)
                    .await
                    .map_err(|e| e.to_string())?
                {
                    self.publish_status_changed(
                        &order.id.to_string(),
                        OrderStatus::PickupAssigned,
                        Some(&driver_id),
                    )
                    .await
                    .map_err(|e| e.to_string())?;
                }
            }
        }

        Ok(())
    }

    async fn publish_status_changed(
        &self,
        order_id: &str,
        status: OrderStatus,
        details: Option<&str>,
    ) -> crate::bus::Result<String> {
        let body = json!({
            "event": "notification.status_changed",
            "order_id": order_id,
            "status": status.as_wire(),
            "details": details,
        });
        self.bus
            .publish_event("notification.status_changed", &body, None)
            .await
    }
}
