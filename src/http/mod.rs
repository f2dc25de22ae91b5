//! HTTP/WebSocket edge: order CRUD, status transitions, and the tracking
//! websocket, all stamped with a correlation id propagated into tracing.

mod orders;
mod tracking;

use std::sync::Arc;

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use crate::bus::EventBus;
use crate::store::OrderStore;
use crate::ws::TrackingHub;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn OrderStore>,
    pub bus: Arc<dyn EventBus>,
    pub hub: Arc<TrackingHub>,
    pub driver_roster: Vec<String>,
    pub source_service: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/orders", post(orders::create_order).get(orders::list_orders))
        .route("/api/orders/:id", get(orders::get_order))
        .route("/api/orders/:id/status", patch(orders::patch_status))
        .route("/ws/tracking/:client_id", get(tracking::ws_handler))
        .route("/healthz", get(health))
        .layer(middleware::from_fn(correlation_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Stamps every inbound request with a request id and correlation id
/// (forwarded from the caller if present, minted fresh otherwise), echoes
/// both on the response, and records them in the tracing span.
async fn correlation_middleware(mut request: Request, next: Next) -> Response {
    let request_id = header_or_fresh(&request, REQUEST_ID_HEADER);
    let correlation_id = header_or_fresh(&request, CORRELATION_ID_HEADER);

    request
        .headers_mut()
        .insert(REQUEST_ID_HEADER, HeaderValue::from_str(&request_id).unwrap());
    request
        .headers_mut()
        .insert(CORRELATION_ID_HEADER, HeaderValue::from_str(&correlation_id).unwrap());

    let span = tracing::info_span!("http_request", %request_id, %correlation_id);

    let mut response = next.run(request).instrument(span).await;
    response
        .headers_mut()
        .insert(REQUEST_ID_HEADER, HeaderValue::from_str(&request_id).unwrap());
    response
        .headers_mut()
        .insert(CORRELATION_ID_HEADER, HeaderValue::from_str(&correlation_id).unwrap());
    response
}

fn header_or_fresh(request: &Request, name: &str) -> String {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}
