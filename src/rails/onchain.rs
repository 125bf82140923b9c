//! On-chain Rail Adapter
//!
//! Verifies user-reported USDT (BEP-20) transfers on BSC over JSON-RPC.
//! The purchaser sends tokens to the company wallet from their own
//! wallet, then submits the transaction hash; verification requires a
//! successful receipt addressed to the token contract carrying exactly
//! one Transfer event, and checks its sender, recipient, amount
//! tolerance and block age.
//!
//! Supports a mock mode with scripted receipts for testing without a
//! node.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Initiation, RailAdapter, RailContext, RailError, RailOutcome, VerifyProof};
use crate::config::OnchainRailConfig;
use crate::journal::{PaymentRail, RailPayload, Transaction};
use crate::money;

/// keccak256("Transfer(address,address,uint256)")
const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

pub struct OnchainRail {
    config: OnchainRailConfig,
    client: Option<reqwest::Client>,
    mock_mode: bool,
    /// Scripted (receipt, block) pairs keyed by tx hash, mock mode only
    mock_receipts: Mutex<Vec<(String, TxReceipt, EthBlock)>>,
}

#[derive(Serialize)]
struct JsonRpcRequest<T> {
    jsonrpc: &'static str,
    method: &'static str,
    params: T,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub status: Option<String>,
    pub block_hash: Option<String>,
    /// Transaction target; must be the USDT contract itself
    pub to: Option<String>,
    pub logs: Vec<ReceiptLog>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiptLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthBlock {
    pub timestamp: String,
}

impl OnchainRail {
    pub fn new(config: OnchainRailConfig) -> Result<Self, RailError> {
        info!(rpc_url = %config.rpc_url, "initializing on-chain rail");
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| RailError::Provider(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            config,
            client: Some(client),
            mock_mode: false,
            mock_receipts: Mutex::new(Vec::new()),
        })
    }

    /// Mock rail for testing without a node
    pub fn new_mock(config: OnchainRailConfig) -> Self {
        Self {
            config,
            client: None,
            mock_mode: true,
            mock_receipts: Mutex::new(Vec::new()),
        }
    }

    pub fn push_mock_receipt(&self, tx_hash: &str, receipt: TxReceipt, block: EthBlock) {
        self.mock_receipts
            .lock()
            .expect("mock receipt lock poisoned")
            .push((tx_hash.to_lowercase(), receipt, block));
    }

    async fn rpc_call<T, R>(&self, method: &'static str, params: T) -> Result<R, RailError>
    where
        T: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| RailError::Provider("no HTTP client (mock mode?)".to_string()))?;

        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        let response = client
            .post(&self.config.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RailError::Provider(format!("RPC request failed: {}", e)))?;

        let rpc_response: JsonRpcResponse<R> = response
            .json()
            .await
            .map_err(|e| RailError::Provider(format!("unparseable RPC response: {}", e)))?;

        if let Some(error) = rpc_response.error {
            return Err(RailError::Provider(format!(
                "RPC error {}: {}",
                error.code, error.message
            )));
        }
        rpc_response
            .result
            .ok_or_else(|| RailError::Provider("no result in RPC response".to_string()))
    }

    async fn fetch_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>, RailError> {
        if self.mock_mode {
            let receipts = self
                .mock_receipts
                .lock()
                .expect("mock receipt lock poisoned");
            return Ok(receipts
                .iter()
                .find(|(h, _, _)| h == &tx_hash.to_lowercase())
                .map(|(_, r, _)| r.clone()));
        }
        self.rpc_call("eth_getTransactionReceipt", (tx_hash,)).await
    }

    async fn fetch_block(&self, block_hash: &str, tx_hash: &str) -> Result<EthBlock, RailError> {
        if self.mock_mode {
            let receipts = self
                .mock_receipts
                .lock()
                .expect("mock receipt lock poisoned");
            return receipts
                .iter()
                .find(|(h, _, _)| h == &tx_hash.to_lowercase())
                .map(|(_, _, b)| b.clone())
                .ok_or_else(|| RailError::Provider("mock block not found".to_string()));
        }
        self.rpc_call("eth_getBlockByHash", (block_hash, false))
            .await
    }

    /// Apply the full verification rule set to a mined receipt
    fn check_receipt(
        &self,
        txn: &Transaction,
        receipt: &TxReceipt,
        block: &EthBlock,
        sender_wallet: &str,
    ) -> RailOutcome {
        if receipt.status.as_deref() != Some("0x1") {
            return RailOutcome::rejected("transaction reverted on chain");
        }

        let Some(timestamp) = parse_hex_i64(&block.timestamp) else {
            return RailOutcome::rejected("block timestamp unparseable");
        };
        let age_hours = (Utc::now().timestamp() - timestamp) / 3600;
        if age_hours > self.config.max_tx_age_hours {
            return RailOutcome::rejected(format!(
                "transaction too old: {} hours exceeds limit of {}",
                age_hours, self.config.max_tx_age_hours
            ));
        }

        let contract = self.config.usdt_contract.to_lowercase();
        let company = self.config.company_wallet.to_lowercase();
        let sender = sender_wallet.to_lowercase();

        // The transaction itself must call the token contract; a transfer
        // routed through another contract needs manual review
        if receipt.to.as_deref().map(str::to_lowercase) != Some(contract.clone()) {
            return RailOutcome::rejected("transaction was not sent to the USDT contract");
        }

        // Exactly one Transfer event at the contract; a multi-leg receipt
        // is ambiguous about which leg pays for this purchase
        let transfers: Vec<&ReceiptLog> = receipt
            .logs
            .iter()
            .filter(|log| {
                log.address.to_lowercase() == contract
                    && log.topics.len() == 3
                    && log.topics[0].to_lowercase() == TRANSFER_TOPIC
            })
            .collect();
        let transfer = match transfers.as_slice() {
            [] => {
                return RailOutcome::rejected(
                    "no USDT transfer event in this transaction",
                );
            }
            [single] => *single,
            many => {
                return RailOutcome::rejected(format!(
                    "expected exactly one USDT transfer event, found {}",
                    many.len()
                ));
            }
        };

        if topic_to_address(&transfer.topics[1]) != sender {
            return RailOutcome::rejected("transfer sender does not match the claimed wallet");
        }
        if topic_to_address(&transfer.topics[2]) != company {
            return RailOutcome::rejected("transfer recipient is not the company wallet");
        }

        let Some(raw) = decode_amount(&transfer.data) else {
            return RailOutcome::rejected("transfer amount unparseable");
        };
        let Some(actual) = money::usdt_from_wei(&raw) else {
            return RailOutcome::rejected("transfer amount out of range");
        };

        if !money::within_tolerance(txn.total_amount, actual, self.config.tolerance_percent) {
            return RailOutcome::rejected(format!(
                "amount {} outside {}% tolerance of expected {}",
                actual, self.config.tolerance_percent, txn.total_amount
            ));
        }

        info!(reference = %txn.reference, amount = %actual, "on-chain transfer verified");
        RailOutcome::Settled {
            amount: Some(actual),
            settled_at: DateTime::from_timestamp(timestamp, 0),
            payload: None,
        }
    }
}

#[async_trait]
impl RailAdapter for OnchainRail {
    fn rail(&self) -> PaymentRail {
        PaymentRail::Onchain
    }

    async fn initiate(
        &self,
        txn: &Transaction,
        _ctx: &RailContext,
    ) -> Result<Initiation, RailError> {
        if txn.currency != money::Currency::Usdt {
            return Err(RailError::Unsupported(PaymentRail::Onchain, "naira"));
        }
        // Nothing to create on the provider side; the purchaser transfers
        // to the company wallet and reports the hash afterwards
        Ok(Initiation {
            payload: RailPayload::Onchain {
                expected_wallet: self.config.company_wallet.clone(),
                tx_hash: None,
                sender_wallet: None,
            },
            redirect_url: None,
        })
    }

    async fn verify(
        &self,
        txn: &Transaction,
        proof: &VerifyProof,
    ) -> Result<RailOutcome, RailError> {
        let VerifyProof::Onchain {
            tx_hash,
            sender_wallet,
        } = proof
        else {
            return Err(RailError::InvalidProof(
                "on-chain verification needs a transaction hash".to_string(),
            ));
        };

        let receipt = match self.fetch_receipt(tx_hash).await {
            Ok(r) => r,
            Err(e) => {
                warn!(reference = %txn.reference, error = %e, "receipt fetch failed");
                return Ok(RailOutcome::StillPending);
            }
        };

        let Some(receipt) = receipt else {
            // Not mined yet, or a bogus hash; either way not a verdict
            debug!(reference = %txn.reference, tx_hash = %tx_hash, "receipt not found");
            return Ok(RailOutcome::StillPending);
        };

        let Some(block_hash) = receipt.block_hash.clone() else {
            return Ok(RailOutcome::StillPending);
        };
        let block = match self.fetch_block(&block_hash, tx_hash).await {
            Ok(b) => b,
            Err(e) => {
                warn!(reference = %txn.reference, error = %e, "block fetch failed");
                return Ok(RailOutcome::StillPending);
            }
        };

        Ok(self.check_receipt(txn, &receipt, &block, sender_wallet))
    }
}

/// Extract the 20-byte address from a 32-byte log topic
fn topic_to_address(topic: &str) -> String {
    let hex = topic.trim_start_matches("0x");
    if hex.len() < 40 {
        return String::new();
    }
    format!("0x{}", &hex[hex.len() - 40..].to_lowercase())
}

/// Decode the uint256 amount from the log data field
fn decode_amount(data: &str) -> Option<BigUint> {
    let hex = data.trim_start_matches("0x");
    if hex.is_empty() {
        return None;
    }
    BigUint::parse_bytes(hex.as_bytes(), 16)
}

fn parse_hex_i64(value: &str) -> Option<i64> {
    i64::from_str_radix(value.trim_start_matches("0x"), 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{ShareClass, TxStatus};
    use rust_decimal::Decimal;

    const COMPANY: &str = "0x1111111111111111111111111111111111111111";
    const SENDER: &str = "0x2222222222222222222222222222222222222222";

    fn test_config() -> OnchainRailConfig {
        OnchainRailConfig {
            company_wallet: COMPANY.to_string(),
            ..OnchainRailConfig::default()
        }
    }

    fn usdt_txn(total: i64) -> Transaction {
        Transaction {
            reference: "SHR-OC1".to_string(),
            user_id: 1,
            class: ShareClass::Regular,
            rail: PaymentRail::Onchain,
            shares: 1,
            price_per_share: Decimal::from(total),
            currency: money::Currency::Usdt,
            total_amount: Decimal::from(total),
            tier_breakdown: Some(crate::journal::TierBreakdown::new(1, 0, 0)),
            status: TxStatus::Pending,
            rail_payload: RailPayload::None,
            ratio_snapshot: None,
            verifier_id: None,
            status_note: None,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    fn address_topic(address: &str) -> String {
        format!("0x{:0>64}", address.trim_start_matches("0x"))
    }

    fn amount_data(usdt: u64) -> String {
        let raw = BigUint::from(usdt) * BigUint::from(10u32).pow(18);
        format!("0x{:0>64}", raw.to_str_radix(16))
    }

    fn transfer_log(config: &OnchainRailConfig, from: &str, to: &str, usdt: u64) -> ReceiptLog {
        ReceiptLog {
            address: config.usdt_contract.clone(),
            topics: vec![
                TRANSFER_TOPIC.to_string(),
                address_topic(from),
                address_topic(to),
            ],
            data: amount_data(usdt),
        }
    }

    fn good_receipt(config: &OnchainRailConfig, amount_usdt: u64) -> TxReceipt {
        TxReceipt {
            status: Some("0x1".to_string()),
            block_hash: Some("0xblock".to_string()),
            to: Some(config.usdt_contract.clone()),
            logs: vec![transfer_log(config, SENDER, COMPANY, amount_usdt)],
        }
    }

    fn fresh_block() -> EthBlock {
        EthBlock {
            timestamp: format!("0x{:x}", Utc::now().timestamp() - 600),
        }
    }

    fn proof() -> VerifyProof {
        VerifyProof::Onchain {
            tx_hash: "0xTX1".to_string(),
            sender_wallet: SENDER.to_string(),
        }
    }

    #[tokio::test]
    async fn test_exact_amount_settles() {
        let config = test_config();
        let rail = OnchainRail::new_mock(config.clone());
        rail.push_mock_receipt("0xTX1", good_receipt(&config, 50), fresh_block());

        let outcome = rail.verify(&usdt_txn(50), &proof()).await.unwrap();
        match outcome {
            RailOutcome::Settled { amount, .. } => assert_eq!(amount, Some(Decimal::from(50))),
            other => panic!("expected settled, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tolerance_boundary() {
        // Expected 50 at 2%: 49 settles, 48 is rejected
        let config = test_config();
        let rail = OnchainRail::new_mock(config.clone());
        rail.push_mock_receipt("0xTX1", good_receipt(&config, 49), fresh_block());
        assert!(matches!(
            rail.verify(&usdt_txn(50), &proof()).await.unwrap(),
            RailOutcome::Settled { .. }
        ));

        let rail = OnchainRail::new_mock(config.clone());
        rail.push_mock_receipt("0xTX1", good_receipt(&config, 48), fresh_block());
        assert!(matches!(
            rail.verify(&usdt_txn(50), &proof()).await.unwrap(),
            RailOutcome::Rejected { .. }
        ));
    }

    #[tokio::test]
    async fn test_unmined_hash_stays_pending() {
        let rail = OnchainRail::new_mock(test_config());
        let outcome = rail.verify(&usdt_txn(50), &proof()).await.unwrap();
        assert!(matches!(outcome, RailOutcome::StillPending));
    }

    #[tokio::test]
    async fn test_reverted_transaction_rejected() {
        let config = test_config();
        let mut receipt = good_receipt(&config, 50);
        receipt.status = Some("0x0".to_string());
        let rail = OnchainRail::new_mock(config);
        rail.push_mock_receipt("0xTX1", receipt, fresh_block());

        assert!(matches!(
            rail.verify(&usdt_txn(50), &proof()).await.unwrap(),
            RailOutcome::Rejected { .. }
        ));
    }

    #[tokio::test]
    async fn test_wrong_recipient_rejected() {
        let config = test_config();
        let mut receipt = good_receipt(&config, 50);
        receipt.logs[0].topics[2] =
            address_topic("0x3333333333333333333333333333333333333333");
        let rail = OnchainRail::new_mock(config);
        rail.push_mock_receipt("0xTX1", receipt, fresh_block());

        assert!(matches!(
            rail.verify(&usdt_txn(50), &proof()).await.unwrap(),
            RailOutcome::Rejected { .. }
        ));
    }

    #[tokio::test]
    async fn test_wrong_sender_rejected() {
        // The claimed sender must match the log's from-address
        let config = test_config();
        let rail = OnchainRail::new_mock(config.clone());
        rail.push_mock_receipt("0xTX1", good_receipt(&config, 50), fresh_block());

        let wrong = VerifyProof::Onchain {
            tx_hash: "0xTX1".to_string(),
            sender_wallet: "0x9999999999999999999999999999999999999999".to_string(),
        };
        assert!(matches!(
            rail.verify(&usdt_txn(50), &wrong).await.unwrap(),
            RailOutcome::Rejected { .. }
        ));
    }

    #[tokio::test]
    async fn test_wrong_contract_rejected() {
        let config = test_config();
        let mut receipt = good_receipt(&config, 50);
        receipt.logs[0].address = "0x4444444444444444444444444444444444444444".to_string();
        let rail = OnchainRail::new_mock(config);
        rail.push_mock_receipt("0xTX1", receipt, fresh_block());

        assert!(matches!(
            rail.verify(&usdt_txn(50), &proof()).await.unwrap(),
            RailOutcome::Rejected { .. }
        ));
    }

    #[tokio::test]
    async fn test_multiple_transfer_logs_rejected() {
        // A multisend that pays the company in one leg is still ambiguous
        let config = test_config();
        let mut receipt = good_receipt(&config, 50);
        receipt.logs.insert(
            0,
            transfer_log(
                &config,
                SENDER,
                "0x5555555555555555555555555555555555555555",
                7,
            ),
        );
        let rail = OnchainRail::new_mock(config);
        rail.push_mock_receipt("0xTX1", receipt, fresh_block());

        let outcome = rail.verify(&usdt_txn(50), &proof()).await.unwrap();
        match outcome {
            RailOutcome::Rejected { reason } => {
                assert!(reason.contains("exactly one"), "unexpected reason: {}", reason)
            }
            other => panic!("expected rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wrong_transaction_target_rejected() {
        // A router/aggregator call can emit a valid-looking Transfer log
        // without the transaction calling the token contract itself
        let config = test_config();
        let mut receipt = good_receipt(&config, 50);
        receipt.to = Some("0x6666666666666666666666666666666666666666".to_string());
        let rail = OnchainRail::new_mock(config);
        rail.push_mock_receipt("0xTX1", receipt, fresh_block());

        assert!(matches!(
            rail.verify(&usdt_txn(50), &proof()).await.unwrap(),
            RailOutcome::Rejected { .. }
        ));
    }

    #[tokio::test]
    async fn test_contract_creation_receipt_rejected() {
        // Contract creations have no `to` at all
        let config = test_config();
        let mut receipt = good_receipt(&config, 50);
        receipt.to = None;
        let rail = OnchainRail::new_mock(config);
        rail.push_mock_receipt("0xTX1", receipt, fresh_block());

        assert!(matches!(
            rail.verify(&usdt_txn(50), &proof()).await.unwrap(),
            RailOutcome::Rejected { .. }
        ));
    }

    #[tokio::test]
    async fn test_stale_block_rejected() {
        let config = test_config();
        let rail = OnchainRail::new_mock(config.clone());
        let stale = EthBlock {
            timestamp: format!("0x{:x}", Utc::now().timestamp() - 25 * 3600),
        };
        rail.push_mock_receipt("0xTX1", good_receipt(&config, 50), stale);

        assert!(matches!(
            rail.verify(&usdt_txn(50), &proof()).await.unwrap(),
            RailOutcome::Rejected { .. }
        ));
    }

    #[tokio::test]
    async fn test_naira_unsupported_at_initiation() {
        let rail = OnchainRail::new_mock(test_config());
        let mut txn = usdt_txn(50);
        txn.currency = money::Currency::Naira;
        let ctx = RailContext {
            user_id: 1,
            email: "buyer@example.com".to_string(),
            name: None,
        };
        assert!(matches!(
            rail.initiate(&txn, &ctx).await.unwrap_err(),
            RailError::Unsupported(PaymentRail::Onchain, _)
        ));
    }

    #[test]
    fn test_topic_to_address() {
        let topic = address_topic(SENDER);
        assert_eq!(topic_to_address(&topic), SENDER);
        assert_eq!(topic_to_address("0xshort"), "");
    }

    #[test]
    fn test_decode_amount() {
        assert_eq!(decode_amount(&amount_data(50)).unwrap(), BigUint::from(50u32) * BigUint::from(10u32).pow(18));
        assert!(decode_amount("0x").is_none());
        assert!(decode_amount("0xzz").is_none());
    }

    #[test]
    fn test_case_insensitive_matching() {
        let config = test_config();
        let rail = OnchainRail::new_mock(config.clone());
        let mut receipt = good_receipt(&config, 50);
        receipt.logs[0].address = config.usdt_contract.to_uppercase().replace("0X", "0x");
        receipt.to = Some(config.usdt_contract.to_uppercase().replace("0X", "0x"));

        let outcome = rail.check_receipt(
            &usdt_txn(50),
            &receipt,
            &fresh_block(),
            &SENDER.to_uppercase().replace("0X", "0x"),
        );
        assert!(matches!(outcome, RailOutcome::Settled { .. }));
    }
}
