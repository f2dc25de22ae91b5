//! Order and status-history row types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The order status domain. A single `Failed` tag covers what the original
/// system recorded as two enum members (`DELIVERY_FAILED` and `FAILED`)
/// sharing the same wire value — a source artefact, not intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    CmsRegistered,
    WmsReceived,
    RouteOptimized,
    Ready,
    PickupAssigned,
    PickingUp,
    PickedUp,
    AtWarehouse,
    OutForDelivery,
    DeliveryAttempted,
    Delivered,
    Failed,
    Cancelled,
}

impl OrderStatus {
    /// The totally-ordered prefix the saga's idempotence probe walks.
    pub const SAGA_PREFIX: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::CmsRegistered,
        OrderStatus::WmsReceived,
        OrderStatus::RouteOptimized,
        OrderStatus::Ready,
    ];

    /// Index within `SAGA_PREFIX`, or `None` if this status is outside the
    /// prefix (e.g. `FAILED`, or anything past `READY`).
    pub fn saga_prefix_index(&self) -> Option<usize> {
        Self::SAGA_PREFIX.iter().position(|s| s == self)
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::CmsRegistered => "CMS_REGISTERED",
            OrderStatus::WmsReceived => "WMS_RECEIVED",
            OrderStatus::RouteOptimized => "ROUTE_OPTIMIZED",
            OrderStatus::Ready => "READY",
            OrderStatus::PickupAssigned => "PICKUP_ASSIGNED",
            OrderStatus::PickingUp => "PICKING_UP",
            OrderStatus::PickedUp => "PICKED_UP",
            OrderStatus::AtWarehouse => "AT_WAREHOUSE",
            OrderStatus::OutForDelivery => "OUT_FOR_DELIVERY",
            OrderStatus::DeliveryAttempted => "DELIVERY_ATTEMPTED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        Some(match s {
            "PENDING" => OrderStatus::Pending,
            "CMS_REGISTERED" => OrderStatus::CmsRegistered,
            "WMS_RECEIVED" => OrderStatus::WmsReceived,
            "ROUTE_OPTIMIZED" => OrderStatus::RouteOptimized,
            "READY" => OrderStatus::Ready,
            "PICKUP_ASSIGNED" => OrderStatus::PickupAssigned,
            "PICKING_UP" => OrderStatus::PickingUp,
            "PICKED_UP" => OrderStatus::PickedUp,
            "AT_WAREHOUSE" => OrderStatus::AtWarehouse,
            "OUT_FOR_DELIVERY" => OrderStatus::OutForDelivery,
            "DELIVERY_ATTEMPTED" => OrderStatus::DeliveryAttempted,
            "DELIVERED" => OrderStatus::Delivered,
            "FAILED" => OrderStatus::Failed,
            "CANCELLED" => OrderStatus::Cancelled,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: Uuid,
    pub client_id: String,
    pub status: OrderStatus,
    pub pickup_address: String,
    pub delivery_address: String,
    pub package_details: Value,
    pub cms_reference: Option<String>,
    pub wms_reference: Option<String>,
    pub route_id: Option<String>,
    pub pickup_driver_id: Option<String>,
    pub delivery_driver_id: Option<String>,
    pub delivery_attempts: i32,
    pub max_delivery_attempts: i32,
    pub delivery_notes: Option<String>,
    pub proof_of_delivery: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StatusHistoryEntry {
    pub id: Uuid,
    pub order_id: Uuid,
    pub old_status: Option<OrderStatus>,
    pub new_status: OrderStatus,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderWithHistory {
    #[serde(flatten)]
    pub order: Order,
    pub status_history: Vec<StatusHistoryEntry>,
}

/// Fields a `Transition` may additionally write alongside the new status.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    pub cms_reference: Option<String>,
    pub wms_reference: Option<String>,
    pub route_id: Option<String>,
    pub pickup_driver_id: Option<String>,
    pub delivery_driver_id: Option<String>,
    pub delivery_attempts: Option<i32>,
    pub delivery_notes: Option<String>,
    pub proof_of_delivery: Option<Value>,
}

/// Filters accepted by `List`.
#[derive(Debug, Clone, Default)]
pub struct OrderFilters {
    pub client_id: Option<String>,
    pub pickup_driver_id: Option<String>,
    pub delivery_driver_id: Option<String>,
    /// Disjunction over pickup/delivery driver id.
    pub driver_id_any: Option<String>,
    pub status: Option<OrderStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saga_prefix_index() {
        assert_eq!(OrderStatus::Pending.saga_prefix_index(), Some(0));
        assert_eq!(OrderStatus::Ready.saga_prefix_index(), Some(4));
        assert_eq!(OrderStatus::PickupAssigned.saga_prefix_index(), None);
        assert_eq!(OrderStatus::Failed.saga_prefix_index(), None);
    }

    #[test]
    fn test_wire_roundtrip() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::CmsRegistered,
            OrderStatus::WmsReceived,
            OrderStatus::RouteOptimized,
            OrderStatus::Ready,
            OrderStatus::PickupAssigned,
            OrderStatus::PickingUp,
            OrderStatus::PickedUp,
            OrderStatus::AtWarehouse,
            OrderStatus::OutForDelivery,
            OrderStatus::DeliveryAttempted,
            OrderStatus::Delivered,
            OrderStatus::Failed,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(OrderStatus::from_wire(status.as_wire()), Some(status));
        }
    }

    #[test]
    fn test_from_wire_unknown() {
        assert_eq!(OrderStatus::from_wire("NOT_A_STATUS"), None);
    }
}
