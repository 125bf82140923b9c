//! Invoice Rail Adapter
//!
//! Centiiv-style invoicing provider. Initiation creates an order with a
//! due date and a hosted invoice link; settlement arrives through a
//! signed webhook or through the sweeper polling the order status.
//!
//! Webhook bodies are authenticated with an HMAC-SHA256 signature over
//! the raw bytes, keyed by a shared secret.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, warn};

use super::{Initiation, RailAdapter, RailContext, RailError, RailOutcome, VerifyProof};
use crate::config::InvoiceRailConfig;
use crate::journal::{PaymentRail, RailPayload, Transaction};

type HmacSha256 = Hmac<Sha256>;

pub struct InvoiceRail {
    config: InvoiceRailConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ProviderResponse<T> {
    status: Option<String>,
    message: Option<String>,
    data: Option<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderData {
    id: String,
    #[serde(alias = "orderLink")]
    invoice_url: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl InvoiceRail {
    pub fn new(config: InvoiceRailConfig) -> Result<Self, RailError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| RailError::Provider(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn order_id(txn: &Transaction) -> Result<&str, RailError> {
        match &txn.rail_payload {
            RailPayload::Invoice { order_id, .. } => Ok(order_id),
            _ => Err(RailError::InvalidProof(
                "transaction has no invoice order id".to_string(),
            )),
        }
    }
}

#[async_trait]
impl RailAdapter for InvoiceRail {
    fn rail(&self) -> PaymentRail {
        PaymentRail::Invoice
    }

    async fn initiate(
        &self,
        txn: &Transaction,
        ctx: &RailContext,
    ) -> Result<Initiation, RailError> {
        let due_date = (Utc::now() + Duration::days(self.config.due_days)).format("%Y-%m-%d");
        let body = serde_json::json!({
            "customerName": ctx.name.clone().unwrap_or_else(|| ctx.email.clone()),
            "customerEmail": ctx.email,
            "dueDate": due_date.to_string(),
            "subject": format!("Share purchase {}", txn.reference),
            "reference": txn.reference,
            "products": [{
                "name": format!("{} shares x{}", txn.class, txn.shares),
                "qty": 1,
                "price": txn.total_amount,
            }],
            "successUrl": format!("{}/payment/success", self.config.success_base_url),
            "notifyUrl": format!("{}/api/webhooks/invoice", self.config.notify_base_url),
        });

        let response = self
            .client
            .post(format!("{}/api/v1/orders", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RailError::Provider(format!("order creation failed: {}", e)))?;

        let parsed: ProviderResponse<OrderData> = response
            .json()
            .await
            .map_err(|e| RailError::Provider(format!("unparseable order response: {}", e)))?;

        let data = parsed.data.ok_or_else(|| {
            RailError::Provider(
                parsed
                    .message
                    .unwrap_or_else(|| "order response missing data".to_string()),
            )
        })?;
        let invoice_url = data
            .invoice_url
            .ok_or_else(|| RailError::Provider("order response missing invoice link".to_string()))?;

        debug!(reference = %txn.reference, order_id = %data.id, "invoice order created");
        Ok(Initiation {
            payload: RailPayload::Invoice {
                order_id: data.id,
                invoice_url: invoice_url.clone(),
            },
            redirect_url: Some(invoice_url),
        })
    }

    async fn verify(
        &self,
        txn: &Transaction,
        _proof: &VerifyProof,
    ) -> Result<RailOutcome, RailError> {
        let order_id = Self::order_id(txn)?;

        let response = match self
            .client
            .get(format!("{}/api/v1/orders/{}", self.config.base_url, order_id))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(reference = %txn.reference, error = %e, "invoice poll unreachable");
                return Ok(RailOutcome::StillPending);
            }
        };

        let parsed: ProviderResponse<OrderData> = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                warn!(reference = %txn.reference, error = %e, "invoice poll unparseable");
                return Ok(RailOutcome::StillPending);
            }
        };

        let status = parsed
            .data
            .and_then(|d| d.status)
            .or(parsed.status)
            .unwrap_or_default();

        match status.to_ascii_lowercase().as_str() {
            "paid" | "completed" => Ok(RailOutcome::settled()),
            "cancelled" | "expired" => {
                Ok(RailOutcome::rejected(format!("invoice {}", status)))
            }
            other => {
                debug!(reference = %txn.reference, status = other, "invoice not settled yet");
                Ok(RailOutcome::StillPending)
            }
        }
    }
}

/// Check a webhook signature against the raw request body.
///
/// Comparison is over decoded bytes; a malformed hex signature fails
/// closed.
pub fn verify_webhook_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim_start_matches("sha256=")) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Sign a body the way the provider does; used by tests and the dev mock
pub fn sign_webhook_body(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_signature_roundtrip() {
        let secret = "whsec_test";
        let body = br#"{"event":"order.paid","data":{"id":"ORD-1"}}"#;
        let sig = sign_webhook_body(secret, body);
        assert!(verify_webhook_signature(secret, body, &sig));
        assert!(verify_webhook_signature(secret, body, &format!("sha256={}", sig)));
    }

    #[test]
    fn test_webhook_signature_rejects_tamper() {
        let secret = "whsec_test";
        let body = br#"{"event":"order.paid"}"#;
        let sig = sign_webhook_body(secret, body);

        assert!(!verify_webhook_signature(secret, b"{\"event\":\"other\"}", &sig));
        assert!(!verify_webhook_signature("wrong_secret", body, &sig));
        assert!(!verify_webhook_signature(secret, body, "not-hex!"));
        assert!(!verify_webhook_signature(secret, body, ""));
    }

    #[test]
    fn test_order_response_parsing() {
        let json = r#"{
            "status": "success",
            "data": {"id": "ORD-42", "orderLink": "https://pay.example/ORD-42", "status": "pending"}
        }"#;
        let parsed: ProviderResponse<OrderData> = serde_json::from_str(json).unwrap();
        let data = parsed.data.unwrap();
        assert_eq!(data.id, "ORD-42");
        assert_eq!(data.invoice_url.as_deref(), Some("https://pay.example/ORD-42"));
    }
}
