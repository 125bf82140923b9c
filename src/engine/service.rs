//! Reconciliation Engine
//!
//! The only component that moves a transaction through its lifecycle.
//! Every entry point converges on the store's CAS-guarded settlement
//! unit, so a webhook, a user-driven verify, the sweeper and an admin
//! decision can all race on the same reference and shares are still
//! credited exactly once. Side effects fire only on the winning call.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::side_effects::SideEffects;
use crate::calculator::{self, QuoteError};
use crate::journal::{PaymentRail, RailPayload, ShareClass, Transaction, TxStatus};
use crate::money::Currency;
use crate::rails::{RailContext, RailError, RailOutcome, RailSet, VerifyProof};
use crate::reference::PaymentReference;
use crate::store::{ReconStore, SettleResult, SettlementUpdate, StoreError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Quote(#[from] QuoteError),

    #[error(transparent)]
    Rail(#[from] RailError),

    #[error("Transaction not found: {0}")]
    NotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// A freshly initiated purchase
#[derive(Debug, Clone)]
pub struct PurchaseInitiated {
    pub transaction: Transaction,
    /// Where to send the purchaser, for redirect rails
    pub redirect_url: Option<String>,
}

/// What a settlement attempt produced
#[derive(Debug, Clone)]
pub enum SettleOutcome {
    Completed(Transaction),
    Failed(Transaction),
    /// Pending purchase withdrawn before any verdict
    Cancelled(Transaction),
    /// Already in a terminal state; nothing changed
    AlreadyTerminal(Transaction),
    /// No verdict yet. For the on-chain rail this also covers a failed
    /// verification held for admin review.
    Pending {
        transaction: Transaction,
        reason: Option<String>,
    },
}

impl SettleOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            SettleOutcome::Completed(t)
            | SettleOutcome::Failed(t)
            | SettleOutcome::Cancelled(t)
            | SettleOutcome::AlreadyTerminal(t) => t,
            SettleOutcome::Pending { transaction, .. } => transaction,
        }
    }
}

pub struct ReconEngine {
    store: Arc<dyn ReconStore>,
    rails: RailSet,
    effects: SideEffects,
    /// Per-user initiation lanes; settlement relies on the store CAS
    lanes: DashMap<i64, Arc<Mutex<()>>>,
}

impl ReconEngine {
    pub fn new(store: Arc<dyn ReconStore>, rails: RailSet, effects: SideEffects) -> Self {
        Self {
            store,
            rails,
            effects,
            lanes: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ReconStore> {
        &self.store
    }

    fn lane(&self, user_id: i64) -> Arc<Mutex<()>> {
        self.lanes
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lane entry once no caller holds it, so the map does not
    /// accumulate one entry per user id ever seen
    fn release_lane(&self, user_id: i64, lane: Arc<Mutex<()>>) {
        drop(lane);
        self.lanes
            .remove_if(&user_id, |_, l| Arc::strong_count(l) == 1);
    }

    #[cfg(any(test, feature = "mock-api"))]
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Quote, create the journal/ledger pair and start the payment with
    /// the provider.
    ///
    /// Pending purchases do not reserve supply; the settlement unit
    /// re-checks capacity when the payment lands.
    pub async fn initiate_purchase(
        &self,
        user_id: i64,
        class: ShareClass,
        quantity: i64,
        currency: Currency,
        rail: PaymentRail,
        ctx: &RailContext,
        manual_payload: Option<RailPayload>,
    ) -> Result<PurchaseInitiated, EngineError> {
        if rail == PaymentRail::AdminGrant {
            return Err(EngineError::InvalidOperation(
                "grants go through the grant operation".to_string(),
            ));
        }

        let lane = self.lane(user_id);
        let result = {
            let _guard = lane.lock().await;
            self.initiate_locked(user_id, class, quantity, currency, rail, ctx, manual_payload)
                .await
        };
        self.release_lane(user_id, lane);
        result
    }

    async fn initiate_locked(
        &self,
        user_id: i64,
        class: ShareClass,
        quantity: i64,
        currency: Currency,
        rail: PaymentRail,
        ctx: &RailContext,
        manual_payload: Option<RailPayload>,
    ) -> Result<PurchaseInitiated, EngineError> {
        let catalog = self.store.catalog().await?;
        let quote = calculator::quote(&catalog, class, quantity, currency)?;

        let reference = PaymentReference::new(class).to_string();
        let mut txn = Transaction {
            reference: reference.clone(),
            user_id,
            class,
            rail,
            shares: quote.shares,
            price_per_share: quote.price_per_share,
            currency,
            total_amount: quote.total_price,
            tier_breakdown: quote.tier_breakdown,
            status: TxStatus::Pending,
            rail_payload: manual_payload.unwrap_or_default(),
            ratio_snapshot: None,
            verifier_id: None,
            status_note: None,
            created_at: Utc::now(),
            settled_at: None,
        };

        let adapter = self.rails.adapter(rail)?;
        let initiation = adapter.initiate(&txn, ctx).await?;
        txn.rail_payload = initiation.payload;

        self.store.insert_pending(&txn).await?;
        info!(%reference, user_id, %class, %rail, shares = quantity, "purchase initiated");

        Ok(PurchaseInitiated {
            transaction: txn,
            redirect_url: initiation.redirect_url,
        })
    }

    /// Drive a pending transaction towards settlement.
    ///
    /// `source` names the caller (webhook, user, sweeper, admin) for the
    /// audit trail.
    pub async fn settle(
        &self,
        reference: &str,
        proof: VerifyProof,
        source: &str,
    ) -> Result<SettleOutcome, EngineError> {
        let txn = self
            .store
            .get_transaction(reference)
            .await?
            .ok_or_else(|| EngineError::NotFound(reference.to_string()))?;

        if txn.status.is_terminal() {
            return Ok(SettleOutcome::AlreadyTerminal(txn));
        }

        // Persist user-reported on-chain evidence before verification so
        // an admin can review it even if the node is unreachable
        if let VerifyProof::Onchain {
            tx_hash,
            sender_wallet,
        } = &proof
        {
            if let RailPayload::Onchain {
                expected_wallet, ..
            } = &txn.rail_payload
            {
                let payload = RailPayload::Onchain {
                    expected_wallet: expected_wallet.clone(),
                    tx_hash: Some(tx_hash.clone()),
                    sender_wallet: Some(sender_wallet.clone()),
                };
                self.store.set_rail_payload(reference, &payload).await?;
            }
        }

        let adapter = self.rails.adapter(txn.rail)?;
        let outcome = adapter.verify(&txn, &proof).await?;

        let verifier_id = match &proof {
            VerifyProof::AdminDecision { verifier_id, .. } => Some(*verifier_id),
            _ => None,
        };

        match outcome {
            RailOutcome::Settled {
                amount,
                settled_at,
                payload,
            } => {
                if let Some(payload) = &payload {
                    self.store.set_rail_payload(reference, payload).await?;
                }
                let update = SettlementUpdate::Complete {
                    settled_amount: amount,
                    settled_at: settled_at.unwrap_or_else(Utc::now),
                    verifier_id,
                    note: Some(format!("settled via {}", source)),
                };
                match self.store.apply_settlement(reference, update).await? {
                    SettleResult::Applied(txn) => {
                        info!(%reference, source, "transaction completed");
                        self.effects.on_completed(&txn).await;
                        Ok(SettleOutcome::Completed(txn))
                    }
                    SettleResult::AlreadyTerminal(txn) => {
                        Ok(SettleOutcome::AlreadyTerminal(txn))
                    }
                }
            }
            RailOutcome::Rejected { reason } => {
                // On-chain rejections stay pending: the sender's money has
                // possibly moved, so only an admin may write the verdict
                if txn.rail == PaymentRail::Onchain && verifier_id.is_none() {
                    warn!(%reference, %reason, "on-chain verification failed, held for review");
                    self.effects.on_admin_review(&txn, &reason).await;
                    return Ok(SettleOutcome::Pending {
                        transaction: txn,
                        reason: Some(reason),
                    });
                }

                let update = SettlementUpdate::Fail {
                    reason: reason.clone(),
                    verifier_id,
                };
                match self.store.apply_settlement(reference, update).await? {
                    SettleResult::Applied(txn) => {
                        info!(%reference, %reason, source, "transaction failed");
                        self.effects.on_failed(&txn, &reason).await;
                        Ok(SettleOutcome::Failed(txn))
                    }
                    SettleResult::AlreadyTerminal(txn) => {
                        Ok(SettleOutcome::AlreadyTerminal(txn))
                    }
                }
            }
            RailOutcome::StillPending => Ok(SettleOutcome::Pending {
                transaction: txn,
                reason: None,
            }),
        }
    }

    /// Cancel a pending purchase (purchaser abandoned checkout)
    pub async fn cancel(
        &self,
        reference: &str,
        reason: &str,
    ) -> Result<SettleOutcome, EngineError> {
        let update = SettlementUpdate::Cancel {
            reason: reason.to_string(),
        };
        match self.store.apply_settlement(reference, update).await? {
            SettleResult::Applied(txn) => {
                info!(%reference, %reason, "transaction cancelled");
                Ok(SettleOutcome::Cancelled(txn))
            }
            SettleResult::AlreadyTerminal(txn) => Ok(SettleOutcome::AlreadyTerminal(txn)),
        }
    }

    /// Admin reversal: reopen a completed transaction, give back the
    /// supply, roll back the referral commission
    pub async fn reverse(
        &self,
        reference: &str,
        verifier_id: i64,
        note: &str,
    ) -> Result<SettleOutcome, EngineError> {
        match self.store.apply_reversal(reference, verifier_id, note).await? {
            SettleResult::Applied(txn) => {
                info!(%reference, verifier_id, "settlement reversed");
                self.effects.on_reversed(&txn).await;
                Ok(SettleOutcome::Pending {
                    transaction: txn,
                    reason: Some(note.to_string()),
                })
            }
            SettleResult::AlreadyTerminal(txn) => Ok(SettleOutcome::AlreadyTerminal(txn)),
        }
    }

    /// Admin grant: credit shares with nothing charged. The journal
    /// records the catalog price at grant time for the audit trail.
    pub async fn grant(
        &self,
        admin_id: i64,
        user_id: i64,
        class: ShareClass,
        quantity: i64,
        currency: Currency,
        note: &str,
    ) -> Result<Transaction, EngineError> {
        let lane = self.lane(user_id);
        let result = {
            let _guard = lane.lock().await;
            self.grant_locked(admin_id, user_id, class, quantity, currency, note)
                .await
        };
        self.release_lane(user_id, lane);
        result
    }

    async fn grant_locked(
        &self,
        admin_id: i64,
        user_id: i64,
        class: ShareClass,
        quantity: i64,
        currency: Currency,
        note: &str,
    ) -> Result<Transaction, EngineError> {
        let catalog = self.store.catalog().await?;
        let quote = calculator::quote(&catalog, class, quantity, currency)?;

        let now = Utc::now();
        let txn = Transaction {
            reference: PaymentReference::new(class).to_string(),
            user_id,
            class,
            rail: PaymentRail::AdminGrant,
            shares: quote.shares,
            price_per_share: quote.price_per_share,
            currency,
            total_amount: rust_decimal::Decimal::ZERO,
            tier_breakdown: quote.tier_breakdown,
            status: TxStatus::Completed,
            rail_payload: RailPayload::AdminGrant {
                granted_by: admin_id,
                note: note.to_string(),
            },
            ratio_snapshot: None,
            verifier_id: Some(admin_id),
            status_note: Some(note.to_string()),
            created_at: now,
            settled_at: Some(now),
        };

        let stored = self.store.insert_settled(&txn).await?;
        info!(reference = %stored.reference, admin_id, user_id, %class, shares = quantity, "shares granted");
        self.effects.on_granted(&stored).await;
        Ok(stored)
    }

    /// Admin decision on a manual or held on-chain transaction
    pub async fn admin_decide(
        &self,
        reference: &str,
        verifier_id: i64,
        approved: bool,
        note: Option<String>,
    ) -> Result<SettleOutcome, EngineError> {
        let txn = self
            .store
            .get_transaction(reference)
            .await?
            .ok_or_else(|| EngineError::NotFound(reference.to_string()))?;
        if txn.status.is_terminal() {
            return Ok(SettleOutcome::AlreadyTerminal(txn));
        }

        if approved {
            // The admin's judgement is the verdict for any rail, including
            // an on-chain transfer held after automated rejection
            let update = SettlementUpdate::Complete {
                settled_amount: None,
                settled_at: Utc::now(),
                verifier_id: Some(verifier_id),
                note,
            };
            match self.store.apply_settlement(reference, update).await? {
                SettleResult::Applied(txn) => {
                    info!(%reference, verifier_id, "settlement approved by admin");
                    self.effects.on_completed(&txn).await;
                    Ok(SettleOutcome::Completed(txn))
                }
                SettleResult::AlreadyTerminal(txn) => Ok(SettleOutcome::AlreadyTerminal(txn)),
            }
        } else {
            let reason = note.unwrap_or_else(|| "rejected by reviewer".to_string());
            let update = SettlementUpdate::Fail {
                reason: reason.clone(),
                verifier_id: Some(verifier_id),
            };
            match self.store.apply_settlement(reference, update).await? {
                SettleResult::Applied(txn) => {
                    info!(%reference, verifier_id, "settlement rejected by admin");
                    self.effects.on_failed(&txn, &reason).await;
                    Ok(SettleOutcome::Failed(txn))
                }
                SettleResult::AlreadyTerminal(txn) => Ok(SettleOutcome::AlreadyTerminal(txn)),
            }
        }
    }

    /// Admin-only removal; completed records must be reversed first so
    /// catalog counters stay honest
    pub async fn delete(&self, reference: &str) -> Result<bool, EngineError> {
        let txn = self
            .store
            .get_transaction(reference)
            .await?
            .ok_or_else(|| EngineError::NotFound(reference.to_string()))?;
        if txn.status == TxStatus::Completed {
            return Err(EngineError::InvalidOperation(
                "reverse a completed transaction before deleting it".to_string(),
            ));
        }
        Ok(self.store.delete_transaction(reference).await?)
    }

    pub fn effects(&self) -> &SideEffects {
        &self.effects
    }
}
