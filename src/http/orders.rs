//! Order CRUD and driver-status-update routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::assigner::{self, Phase};
use crate::error::{Error, Result};
use crate::store::{OrderFilters, OrderStatus, OrderWithHistory, TransitionFields};

use super::AppState;

const ALLOWED_PATCH_STATUSES: &[&str] = &[
    "PICKING_UP",
    "PICKED_UP",
    "AT_WAREHOUSE",
    "OUT_FOR_DELIVERY",
    "DELIVERY_ATTEMPTED",
    "DELIVERED",
    "FAILED",
];

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub client_id: String,
    pub pickup_address: String,
    pub delivery_address: String,
    #[serde(default)]
    pub package_details: Value,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub client_id: Option<String>,
    pub pickup_driver_id: Option<String>,
    pub delivery_driver_id: Option<String>,
    pub driver_id_any: Option<String>,
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct ListOrdersResponse {
    pub orders: Vec<crate::store::Order>,
    pub total: i64,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,
    #[serde(default)]
    pub delivery_notes: Option<String>,
    #[serde(default)]
    pub proof_of_delivery: Option<Value>,
    #[serde(default)]
    pub pickup_driver_id: Option<String>,
    #[serde(default)]
    pub delivery_driver_id: Option<String>,
}

pub async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<crate::store::Order>)> {
    let order = state
        .store
        .create(
            &payload.client_id,
            &payload.pickup_address,
            &payload.delivery_address,
            payload.package_details.clone(),
        )
        .await?;

    let body = json!({
        "event": "order.created",
        "order_id": order.id,
        "client_id": payload.client_id,
        "pickup_address": payload.pickup_address,
        "delivery_address": payload.delivery_address,
        "package_details": payload.package_details,
    });
    state.bus.publish_event("order.created", &body, None).await?;

    Ok((StatusCode::ACCEPTED, Json(order)))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderWithHistory>> {
    let order = state
        .store
        .get(id)
        .await?
        .ok_or(Error::Store(crate::store::StoreError::NotFound { id }))?;
    Ok(Json(order))
}

pub async fn list_orders(
    State(state): State<AppState>,
    Query(params): Query<ListOrdersQuery>,
) -> Result<Json<ListOrdersResponse>> {
    let limit = params.limit.clamp(1, 200);
    let offset = params.offset.max(0);
    let filters = OrderFilters {
        client_id: params.client_id,
        pickup_driver_id: params.pickup_driver_id,
        delivery_driver_id: params.delivery_driver_id,
        driver_id_any: params.driver_id_any,
        status: params.status.as_deref().and_then(OrderStatus::from_wire),
    };

    let (orders, total) = state.store.list(&filters, limit, offset).await?;
    Ok(Json(ListOrdersResponse { orders, total }))
}

pub async fn patch_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusUpdateRequest>,
) -> Result<Json<crate::store::Order>> {
    if !ALLOWED_PATCH_STATUSES.contains(&payload.status.as_str()) {
        return Err(Error::Validation(format!(
            "status must be one of: {ALLOWED_PATCH_STATUSES:?}"
        )));
    }

    let current = state
        .store
        .get(id)
        .await?
        .ok_or(Error::Store(crate::store::StoreError::NotFound { id }))?
        .order;

    let mut fields = TransitionFields {
        delivery_notes: payload.delivery_notes.clone(),
        proof_of_delivery: payload.proof_of_delivery.clone(),
        pickup_driver_id: payload.pickup_driver_id.clone(),
        delivery_driver_id: payload.delivery_driver_id.clone(),
        ..Default::default()
    };

    let mut target_status =
        OrderStatus::from_wire(&payload.status).expect("validated against ALLOWED_PATCH_STATUSES above");

    if target_status == OrderStatus::AtWarehouse {
        // System auto-assigns a delivery driver but stays at AT_WAREHOUSE;
        // the driver manually transitions to OUT_FOR_DELIVERY later.
        if let Some(driver_id) = assigner::select_driver(&*state.store, &state.driver_roster, Phase::Delivery).await?
        {
            fields.delivery_driver_id = Some(driver_id);
        }
    } else if target_status == OrderStatus::DeliveryAttempted {
        let new_attempts = current.delivery_attempts + 1;
        fields.delivery_attempts = Some(new_attempts);
        if new_attempts >= current.max_delivery_attempts {
            target_status = OrderStatus::Failed;
        }
    }

    let details = format!("driver update: {}", payload.status);
    let updated = state
        .store
        .transition(id, target_status, Some(&details), fields)
        .await?
        .ok_or(Error::Store(crate::store::StoreError::NotFound { id }))?;

    let body = json!({
        "event": "notification.status_changed",
        "order_id": id,
        "status": target_status.as_wire(),
    });
    state.bus.publish_event("notification.status_changed", &body, None).await?;

    Ok(Json(updated))
}
