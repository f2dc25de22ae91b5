//! Saga Orchestrator: drives an order through CMS → WMS → ROS.

use std::time::Duration;

use serde_json::{json, Value};

use crate::bus::EventBus;
use crate::clients::{CmsClient, RosClient, WmsClient};
use crate::config::Config;
use crate::store::OrderStatus;

pub type Result<T> = std::result::Result<T, SagaError>;

#[derive(Debug, thiserror::Error)]
pub enum SagaError {
    #[error("failed to build saga http client: {0}")]
    Init(#[from] reqwest::Error),
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Index within `OrderStatus::SAGA_PREFIX` that each step's completion
/// corresponds to. Used by the idempotence probe's skip rule.
const CMS_STEP_INDEX: usize = 1; // CMS_REGISTERED
const WMS_STEP_INDEX: usize = 2; // WMS_RECEIVED
const ROS_STEP_INDEX: usize = 3; // ROUTE_OPTIMIZED

/// Outcome of one saga run, published by the caller as a sequence of
/// `order.{step}` events (or `order.saga_failed` on failure).
#[derive(Debug, Clone, serde::Serialize)]
pub struct SagaResult {
    pub success: bool,
    pub order_id: String,
    pub cms_reference: Option<String>,
    pub wms_reference: Option<String>,
    pub route_id: Option<String>,
    pub error: Option<String>,
    pub completed_steps: Vec<String>,
    pub skipped_steps: Vec<String>,
}

impl SagaResult {
    fn new(order_id: &str) -> Self {
        Self {
            success: false,
            order_id: order_id.to_string(),
            cms_reference: None,
            wms_reference: None,
            route_id: None,
            error: None,
            completed_steps: Vec::new(),
            skipped_steps: Vec::new(),
        }
    }
}

pub struct SagaOrchestrator {
    cms: CmsClient,
    wms: WmsClient,
    ros: RosClient,
    http: reqwest::Client,
    order_service_url: String,
}

impl SagaOrchestrator {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()?;
        Ok(Self {
            cms: CmsClient::new(http.clone(), config.cms_url.clone()),
            wms: WmsClient::new(config.wms_host.clone(), config.wms_port),
            ros: RosClient::new(http.clone(), config.ros_url.clone()),
            http,
            order_service_url: config.order_service_url.clone(),
        })
    }

    /// Drives one order through the three-step saga, honoring the
    /// idempotence probe and compensating on mid-saga failure.
    #[tracing::instrument(skip(self, package_details), fields(order_id = %order_id))]
    pub async fn run(
        &self,
        order_id: &str,
        client_id: &str,
        pickup_address: &str,
        delivery_address: &str,
        package_details: &Value,
    ) -> SagaResult {
        let mut result = SagaResult::new(order_id);
        let current_index = self.probe_current_index(order_id).await;

        if skip_step(current_index, CMS_STEP_INDEX) {
            result.skipped_steps.push("cms_registered".to_string());
        } else {
            match self
                .cms
                .register_order(order_id, client_id, pickup_address, delivery_address)
                .await
            {
                Ok(reference) => {
                    result.cms_reference = Some(reference);
                    result.completed_steps.push("cms_registered".to_string());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "CMS register failed, no compensation needed");
                    result.error = Some(e.to_string());
                    return result;
                }
            }
        }

        if skip_step(current_index, WMS_STEP_INDEX) {
            result.skipped_steps.push("wms_received".to_string());
        } else {
            let details_json = package_details.to_string();
            match self.wms.add_package(order_id, &details_json).await {
                Ok(reference) => {
                    result.wms_reference = Some(reference);
                    result.completed_steps.push("wms_received".to_string());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WMS add_package failed, compensating CMS");
                    result.error = Some(e.to_string());
                    if let Err(comp_err) = self.cms.cancel_order(order_id).await {
                        tracing::warn!(error = %comp_err, "CMS compensation after WMS failure did not succeed");
                    }
                    return result;
                }
            }
        }

        if skip_step(current_index, ROS_STEP_INDEX) {
            result.skipped_steps.push("route_optimized".to_string());
        } else {
            match self.ros.optimize_route(order_id, delivery_address).await {
                Ok(route_id) => {
                    result.route_id = Some(route_id);
                    result.completed_steps.push("route_optimized".to_string());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "ROS optimize failed, compensating WMS then CMS");
                    result.error = Some(e.to_string());
                    if let Err(comp_err) = self.wms.cancel_package(order_id).await {
                        tracing::warn!(error = %comp_err, "WMS compensation after ROS failure did not succeed");
                    }
                    if let Err(comp_err) = self.cms.cancel_order(order_id).await {
                        tracing::warn!(error = %comp_err, "CMS compensation after ROS failure did not succeed");
                    }
                    return result;
                }
            }
        }

        result.success = true;
        result
    }

    /// Fetches the order's current status from the Order Store's own HTTP
    /// surface and returns its index in the saga prefix, or `None` if the
    /// probe failed or the status is outside the prefix (skipping stays
    /// disabled in both cases, so the step runs).
    async fn probe_current_index(&self, order_id: &str) -> Option<usize> {
        let url = format!("{}/api/orders/{order_id}", self.order_service_url);
        let response = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "idempotence probe request failed, running all steps");
                return None;
            }
        };
        if !response.status().is_success() {
            return None;
        }
        let body: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "idempotence probe response was not valid JSON");
                return None;
            }
        };
        let status = body.get("status")?.as_str()?;
        OrderStatus::from_wire(status).and_then(|s| s.saga_prefix_index())
    }
}

fn skip_step(current_index: Option<usize>, step_index: usize) -> bool {
    current_index.map(|idx| idx >= step_index).unwrap_or(false)
}

/// Publishes one `order.{step}` event per completed (including skipped)
/// step, then `order.saga_failed` on failure. Shared by every binary that
/// runs the saga consumer, standalone or split-process.
pub async fn publish_result(bus: &dyn EventBus, result: &SagaResult, correlation_id: String) -> crate::bus::Result<()> {
    for step in result.completed_steps.iter().chain(result.skipped_steps.iter()) {
        let body = json!({
            "event": format!("order.{step}"),
            "order_id": result.order_id,
            "cms_reference": result.cms_reference,
            "wms_reference": result.wms_reference,
            "route_id": result.route_id,
        });
        bus.publish_event(&format!("order.{step}"), &body, Some(correlation_id.clone()))
            .await?;
    }

    if !result.success {
        let body = json!({
            "event": "order.saga_failed",
            "order_id": result.order_id,
            "error": result.error,
            "completed_steps": result.completed_steps,
        });
        bus.publish_event("order.saga_failed", &body, Some(correlation_id))
            .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_step_below_threshold_runs() {
        assert!(!skip_step(Some(0), CMS_STEP_INDEX));
    }

    #[test]
    fn test_skip_step_at_or_above_threshold_skips() {
        assert!(skip_step(Some(1), CMS_STEP_INDEX));
        assert!(skip_step(Some(4), ROS_STEP_INDEX));
    }

    #[test]
    fn test_skip_step_unknown_status_never_skips() {
        assert!(!skip_step(None, CMS_STEP_INDEX));
    }
}
