//! REST/JSON client for the Route Optimisation System.

use serde::{Deserialize, Serialize};

use super::{ClientError, Result};

const DEPOT_ADDRESS: &str = "SwiftLogistics Warehouse, Colombo 10";
const DEFAULT_VEHICLE_ID: &str = "VH-001";

#[derive(Debug, Serialize)]
struct DeliveryPoint {
    order_id: String,
    address: String,
    priority: &'static str,
}

#[derive(Debug, Serialize)]
struct OptimizeRequest {
    delivery_points: Vec<DeliveryPoint>,
    vehicle_id: &'static str,
    depot_address: &'static str,
}

#[derive(Debug, Deserialize)]
struct OptimizeResponse {
    route_id: String,
    #[serde(default)]
    #[allow(dead_code)]
    total_distance_km: Option<f64>,
    #[serde(default)]
    #[allow(dead_code)]
    estimated_duration_min: Option<f64>,
    #[serde(default)]
    #[allow(dead_code)]
    stops: Vec<serde_json::Value>,
}

pub struct RosClient {
    http: reqwest::Client,
    base_url: String,
}

impl RosClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Requests a single-stop route optimisation for one order and returns
    /// the resulting `route_id`.
    pub async fn optimize_route(&self, order_id: &str, delivery_address: &str) -> Result<String> {
        let request = OptimizeRequest {
            delivery_points: vec![DeliveryPoint {
                order_id: order_id.to_string(),
                address: delivery_address.to_string(),
                priority: "normal",
            }],
            vehicle_id: DEFAULT_VEHICLE_ID,
            depot_address: DEPOT_ADDRESS,
        };

        let response = self
            .http
            .post(format!("{}/api/routes/optimize", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::Upstream(format!(
                "ROS optimize returned {}",
                response.status()
            )));
        }

        let parsed: OptimizeResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))?;
        Ok(parsed.route_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimize_request_serializes_single_delivery_point() {
        let request = OptimizeRequest {
            delivery_points: vec![DeliveryPoint {
                order_id: "order-1".to_string(),
                address: "123 Main St".to_string(),
                priority: "normal",
            }],
            vehicle_id: DEFAULT_VEHICLE_ID,
            depot_address: DEPOT_ADDRESS,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["delivery_points"][0]["order_id"], "order-1");
        assert_eq!(json["vehicle_id"], "VH-001");
        assert_eq!(json["depot_address"], DEPOT_ADDRESS);
    }

    #[test]
    fn test_optimize_response_parses_minimal_payload() {
        let body = serde_json::json!({ "route_id": "ROUTE-42" });
        let parsed: OptimizeResponse = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.route_id, "ROUTE-42");
        assert!(parsed.stops.is_empty());
    }
}
