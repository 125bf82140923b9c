//! Card Rail Adapter
//!
//! Paystack-style card processor. Initiation creates a hosted checkout
//! session; verification looks the transaction up by our own reference.
//! Amounts go over the wire in kobo minor units.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{Initiation, RailAdapter, RailContext, RailError, RailOutcome, VerifyProof};
use crate::config::CardRailConfig;
use crate::journal::{PaymentRail, RailPayload, Transaction};
use crate::money::{self, Currency};

pub struct CardRail {
    config: CardRailConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ProcessorResponse<T> {
    status: bool,
    message: Option<String>,
    data: Option<T>,
}

#[derive(Deserialize)]
struct InitializeData {
    authorization_url: String,
    reference: String,
}

#[derive(Deserialize)]
struct VerifyData {
    status: String,
    /// Settled amount in minor units
    amount: Option<i64>,
    paid_at: Option<DateTime<Utc>>,
}

impl CardRail {
    pub fn new(config: CardRailConfig) -> Result<Self, RailError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| RailError::Provider(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    async fn post_initialize(
        &self,
        txn: &Transaction,
        ctx: &RailContext,
    ) -> Result<InitializeData, RailError> {
        let amount_kobo = money::to_minor_units(txn.total_amount)?;
        let body = serde_json::json!({
            "email": ctx.email,
            "amount": amount_kobo,
            "reference": txn.reference,
            "currency": "NGN",
            "callback_url": format!("{}/payment/callback", self.config.callback_base_url),
        });

        let response = self
            .client
            .post(format!("{}/transaction/initialize", self.config.base_url))
            .bearer_auth(&self.config.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RailError::Provider(format!("initialize request failed: {}", e)))?;

        let parsed: ProcessorResponse<InitializeData> = response
            .json()
            .await
            .map_err(|e| RailError::Provider(format!("unparseable initialize response: {}", e)))?;

        if !parsed.status {
            return Err(RailError::Provider(
                parsed
                    .message
                    .unwrap_or_else(|| "processor rejected initialization".to_string()),
            ));
        }
        parsed
            .data
            .ok_or_else(|| RailError::Provider("initialize response missing data".to_string()))
    }
}

#[async_trait]
impl RailAdapter for CardRail {
    fn rail(&self) -> PaymentRail {
        PaymentRail::Card
    }

    async fn initiate(
        &self,
        txn: &Transaction,
        ctx: &RailContext,
    ) -> Result<Initiation, RailError> {
        if txn.currency != Currency::Naira {
            return Err(RailError::Unsupported(PaymentRail::Card, "usdt"));
        }

        let data = self.post_initialize(txn, ctx).await?;
        debug!(reference = %txn.reference, "card checkout session created");

        Ok(Initiation {
            payload: RailPayload::Card {
                authorization_url: data.authorization_url.clone(),
                processor_reference: data.reference,
            },
            redirect_url: Some(data.authorization_url),
        })
    }

    async fn verify(
        &self,
        txn: &Transaction,
        _proof: &VerifyProof,
    ) -> Result<RailOutcome, RailError> {
        let response = match self
            .client
            .get(format!(
                "{}/transaction/verify/{}",
                self.config.base_url, txn.reference
            ))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                // A transport failure is not a verdict
                warn!(reference = %txn.reference, error = %e, "card verify unreachable");
                return Ok(RailOutcome::StillPending);
            }
        };

        let parsed: ProcessorResponse<VerifyData> = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                warn!(reference = %txn.reference, error = %e, "card verify unparseable");
                return Ok(RailOutcome::StillPending);
            }
        };

        let Some(data) = parsed.data else {
            return Ok(RailOutcome::StillPending);
        };

        match data.status.as_str() {
            "success" => Ok(RailOutcome::Settled {
                amount: data.amount.map(|kobo| Decimal::from(kobo) / Decimal::from(100)),
                settled_at: data.paid_at,
                payload: None,
            }),
            "failed" => Ok(RailOutcome::rejected("card processor reported failure")),
            "abandoned" => Ok(RailOutcome::rejected("checkout session abandoned")),
            // "pending", "ongoing", "queued" and anything unknown
            other => {
                debug!(reference = %txn.reference, status = other, "card payment not settled yet");
                Ok(RailOutcome::StillPending)
            }
        }
    }
}
