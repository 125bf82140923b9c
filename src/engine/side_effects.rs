//! Settlement Side Effects
//!
//! Referral commissions and notification emails fired after a terminal
//! transition. Exactly-once delivery rides on the store's outbox: the
//! CAS winner claims a (reference, kind) row before emitting, and a
//! reversal clears the completion-direction claims so a later re-settle
//! can fire them again.
//!
//! Emission failures never fail the settlement; they are marked in the
//! outbox and retried by the sweeper.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::journal::Transaction;
use crate::store::{ReconStore, SideEffectKind, StoreError};

/// Referral commission seam. The referral program lives in another
/// service; this engine only signals it.
#[async_trait]
pub trait Referral: Send + Sync {
    async fn credit_commission(&self, txn: &Transaction) -> anyhow::Result<()>;
    async fn rollback_commission(&self, txn: &Transaction) -> anyhow::Result<()>;
}

/// Outbound notification seam
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn purchase_confirmed(&self, txn: &Transaction) -> anyhow::Result<()>;
    async fn purchase_failed(&self, txn: &Transaction, reason: &str) -> anyhow::Result<()>;
    async fn admin_review_needed(&self, txn: &Transaction, reason: &str) -> anyhow::Result<()>;
}

/// Default implementations log the event; deployments wire real senders
pub struct LogReferral;

#[async_trait]
impl Referral for LogReferral {
    async fn credit_commission(&self, txn: &Transaction) -> anyhow::Result<()> {
        info!(reference = %txn.reference, user_id = txn.user_id, "referral commission credited");
        Ok(())
    }

    async fn rollback_commission(&self, txn: &Transaction) -> anyhow::Result<()> {
        info!(reference = %txn.reference, user_id = txn.user_id, "referral commission rolled back");
        Ok(())
    }
}

pub struct LogNotifier {
    pub admin_email: String,
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn purchase_confirmed(&self, txn: &Transaction) -> anyhow::Result<()> {
        info!(reference = %txn.reference, user_id = txn.user_id, "purchase confirmation sent");
        Ok(())
    }

    async fn purchase_failed(&self, txn: &Transaction, reason: &str) -> anyhow::Result<()> {
        info!(reference = %txn.reference, reason, "purchase failure notice sent");
        Ok(())
    }

    async fn admin_review_needed(&self, txn: &Transaction, reason: &str) -> anyhow::Result<()> {
        info!(
            reference = %txn.reference,
            admin = %self.admin_email,
            reason,
            "admin review notice sent"
        );
        Ok(())
    }
}

pub struct SideEffects {
    store: Arc<dyn ReconStore>,
    referral: Arc<dyn Referral>,
    notifier: Arc<dyn Notifier>,
}

impl SideEffects {
    pub fn new(
        store: Arc<dyn ReconStore>,
        referral: Arc<dyn Referral>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            referral,
            notifier,
        }
    }

    async fn emit(&self, txn: &Transaction, kind: SideEffectKind, reason: Option<&str>) {
        let claimed = match self.store.claim_side_effect(&txn.reference, kind).await {
            Ok(c) => c,
            Err(e) => {
                error!(reference = %txn.reference, %kind, error = %e, "outbox claim failed");
                return;
            }
        };
        if !claimed {
            // Another worker already owns this emission
            return;
        }

        let result = match kind {
            SideEffectKind::ReferralCommission => self.referral.credit_commission(txn).await,
            SideEffectKind::ReferralRollback => self.referral.rollback_commission(txn).await,
            SideEffectKind::PurchaseEmail => self.notifier.purchase_confirmed(txn).await,
            SideEffectKind::FailureEmail => {
                self.notifier
                    .purchase_failed(txn, reason.unwrap_or("payment failed"))
                    .await
            }
            SideEffectKind::AdminReviewEmail => {
                self.notifier
                    .admin_review_needed(txn, reason.unwrap_or("needs review"))
                    .await
            }
        };

        let (success, error) = match &result {
            Ok(()) => (true, None),
            Err(e) => {
                warn!(reference = %txn.reference, %kind, error = %e, "side effect emission failed");
                (false, Some(e.to_string()))
            }
        };
        if let Err(e) = self
            .store
            .mark_side_effect(&txn.reference, kind, success, error.as_deref())
            .await
        {
            error!(reference = %txn.reference, %kind, error = %e, "outbox mark failed");
        }
    }

    pub async fn on_completed(&self, txn: &Transaction) {
        self.emit(txn, SideEffectKind::ReferralCommission, None).await;
        self.emit(txn, SideEffectKind::PurchaseEmail, None).await;
    }

    /// Admin grants skip the referral program
    pub async fn on_granted(&self, txn: &Transaction) {
        self.emit(txn, SideEffectKind::PurchaseEmail, None).await;
    }

    pub async fn on_failed(&self, txn: &Transaction, reason: &str) {
        self.emit(txn, SideEffectKind::FailureEmail, Some(reason)).await;
    }

    pub async fn on_reversed(&self, txn: &Transaction) {
        self.emit(txn, SideEffectKind::ReferralRollback, None).await;
    }

    pub async fn on_admin_review(&self, txn: &Transaction, reason: &str) {
        self.emit(txn, SideEffectKind::AdminReviewEmail, Some(reason))
            .await;
    }

    /// Re-drive outbox rows whose emission failed earlier
    pub async fn retry_failed(&self, limit: i64) -> Result<usize, StoreError> {
        let failed = self.store.list_failed_side_effects(limit).await?;
        let mut retried = 0;
        for record in failed {
            let Some(txn) = self.store.get_transaction(&record.reference).await? else {
                warn!(reference = %record.reference, "outbox row with no transaction");
                continue;
            };
            let result = match record.kind {
                SideEffectKind::ReferralCommission => self.referral.credit_commission(&txn).await,
                SideEffectKind::ReferralRollback => self.referral.rollback_commission(&txn).await,
                SideEffectKind::PurchaseEmail => self.notifier.purchase_confirmed(&txn).await,
                SideEffectKind::FailureEmail => {
                    let reason = txn.status_note.clone().unwrap_or_default();
                    self.notifier.purchase_failed(&txn, &reason).await
                }
                SideEffectKind::AdminReviewEmail => {
                    let reason = txn.status_note.clone().unwrap_or_default();
                    self.notifier.admin_review_needed(&txn, &reason).await
                }
            };
            let (success, error) = match &result {
                Ok(()) => (true, None),
                Err(e) => (false, Some(e.to_string())),
            };
            self.store
                .mark_side_effect(&record.reference, record.kind, success, error.as_deref())
                .await?;
            retried += 1;
        }
        Ok(retried)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogSeedConfig;
    use crate::journal::{PaymentRail, RailPayload, ShareClass, TierBreakdown, TxStatus};
    use crate::store::mem::MemStore;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingReferral {
        credits: AtomicUsize,
        rollbacks: AtomicUsize,
    }

    #[async_trait]
    impl Referral for CountingReferral {
        async fn credit_commission(&self, _txn: &Transaction) -> anyhow::Result<()> {
            self.credits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn rollback_commission(&self, _txn: &Transaction) -> anyhow::Result<()> {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn txn() -> Transaction {
        Transaction {
            reference: "SHR-FX1".to_string(),
            user_id: 5,
            class: ShareClass::Regular,
            rail: PaymentRail::Card,
            shares: 1,
            price_per_share: Decimal::from(50_000),
            currency: crate::money::Currency::Naira,
            total_amount: Decimal::from(50_000),
            tier_breakdown: Some(TierBreakdown::new(1, 0, 0)),
            status: TxStatus::Completed,
            rail_payload: RailPayload::None,
            ratio_snapshot: None,
            verifier_id: None,
            status_note: None,
            created_at: Utc::now(),
            settled_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn test_completion_effects_fire_once() {
        let store = Arc::new(MemStore::new(&CatalogSeedConfig::default()));
        let referral = Arc::new(CountingReferral {
            credits: AtomicUsize::new(0),
            rollbacks: AtomicUsize::new(0),
        });
        let effects = SideEffects::new(
            store,
            referral.clone(),
            Arc::new(LogNotifier {
                admin_email: "ops@example.com".to_string(),
            }),
        );

        let t = txn();
        effects.on_completed(&t).await;
        effects.on_completed(&t).await;
        effects.on_completed(&t).await;

        assert_eq!(referral.credits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_grant_skips_referral() {
        let store = Arc::new(MemStore::new(&CatalogSeedConfig::default()));
        let referral = Arc::new(CountingReferral {
            credits: AtomicUsize::new(0),
            rollbacks: AtomicUsize::new(0),
        });
        let effects = SideEffects::new(
            store,
            referral.clone(),
            Arc::new(LogNotifier {
                admin_email: "ops@example.com".to_string(),
            }),
        );

        effects.on_granted(&txn()).await;
        assert_eq!(referral.credits.load(Ordering::SeqCst), 0);
    }
}
