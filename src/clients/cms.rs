//! SOAP client for the Client Management System.

use std::sync::OnceLock;

use regex::Regex;

use super::{ClientError, Result};

const REGISTER_XML_TPL: &str = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:cms="http://swiftlogistics.lk/cms">
  <soap:Body><cms:RegisterOrderRequest>
    <cms:OrderId>{order_id}</cms:OrderId><cms:ClientId>{client_id}</cms:ClientId>
    <cms:PickupAddress>{pickup_address}</cms:PickupAddress><cms:DeliveryAddress>{delivery_address}</cms:DeliveryAddress>
  </cms:RegisterOrderRequest></soap:Body></soap:Envelope>"#;

const CANCEL_XML_TPL: &str = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:cms="http://swiftlogistics.lk/cms">
  <soap:Body><cms:CancelOrderRequest>
    <cms:OrderId>{order_id}</cms:OrderId>
  </cms:CancelOrderRequest></soap:Body></soap:Envelope>"#;

fn cms_reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)<(?:\w+:)?CmsReference>(.*?)</(?:\w+:)?CmsReference>").expect("valid regex")
    })
}

pub struct CmsClient {
    http: reqwest::Client,
    base_url: String,
}

impl CmsClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Registers an order with CMS, returning its `cms_reference` on
    /// success. The `package_details` field is not part of the SOAP
    /// envelope (CMS only tracks addresses and identifiers).
    pub async fn register_order(
        &self,
        order_id: &str,
        client_id: &str,
        pickup_address: &str,
        delivery_address: &str,
    ) -> Result<String> {
        let body = REGISTER_XML_TPL
            .replace("{order_id}", order_id)
            .replace("{client_id}", client_id)
            .replace("{pickup_address}", pickup_address)
            .replace("{delivery_address}", delivery_address);

        let response = self
            .http
            .post(format!("{}/soap/orders", self.base_url))
            .header("Content-Type", "application/xml")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::Upstream(format!(
                "CMS register returned {}",
                response.status()
            )));
        }

        let text = response.text().await?;
        extract_cms_reference(&text)
    }

    /// Cancels a previously registered order.
    pub async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let body = CANCEL_XML_TPL.replace("{order_id}", order_id);

        let response = self
            .http
            .post(format!("{}/soap/cancel", self.base_url))
            .header("Content-Type", "application/xml")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::Upstream(format!(
                "CMS cancel returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

fn extract_cms_reference(xml: &str) -> Result<String> {
    cms_reference_pattern()
        .captures(xml)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .ok_or_else(|| ClientError::Parse("missing <CmsReference> in CMS response".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_cms_reference() {
        let xml = r#"<soap:Envelope><soap:Body><cms:RegisterOrderResponse><cms:CmsReference>CMS-ABC12345</cms:CmsReference></cms:RegisterOrderResponse></soap:Body></soap:Envelope>"#;
        assert_eq!(extract_cms_reference(xml).unwrap(), "CMS-ABC12345");
    }

    #[test]
    fn test_extract_cms_reference_no_namespace_prefix() {
        let xml = r#"<Envelope><Body><CmsReference>CMS-XYZ</CmsReference></Body></Envelope>"#;
        assert_eq!(extract_cms_reference(xml).unwrap(), "CMS-XYZ");
    }

    #[test]
    fn test_extract_cms_reference_missing() {
        let xml = r#"<soap:Envelope><soap:Body><cms:Fault>no reference here</cms:Fault></soap:Body></soap:Envelope>"#;
        assert!(extract_cms_reference(xml).is_err());
    }

    #[test]
    fn test_register_xml_template_substitutes_fields() {
        let body = REGISTER_XML_TPL
            .replace("{order_id}", "order-1")
            .replace("{client_id}", "client-1")
            .replace("{pickup_address}", "123 Main St")
            .replace("{delivery_address}", "456 Oak Ave");
        assert!(body.contains("<cms:OrderId>order-1</cms:OrderId>"));
        assert!(body.contains("<cms:ClientId>client-1</cms:ClientId>"));
        assert!(!body.contains("{order_id}"));
    }
}
