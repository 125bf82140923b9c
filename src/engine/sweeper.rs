//! Reconciliation Sweeper
//!
//! Two background loops:
//! - the poll sweep re-drives pending transactions on pollable rails
//!   (card, invoice) so a missed webhook never strands a payment
//! - the drift sweep compares the catalog sold counters against the
//!   journal's completed sums and logs any disagreement loudly; the
//!   journal is the source of truth
//!
//! Plus a retry pass over side effects whose emission failed.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::service::ReconEngine;
use crate::config::SweeperConfig;
use crate::journal::PaymentRail;
use crate::rails::VerifyProof;

pub struct Sweeper {
    engine: Arc<ReconEngine>,
    config: SweeperConfig,
}

impl Sweeper {
    pub fn new(engine: Arc<ReconEngine>, config: SweeperConfig) -> Self {
        Self { engine, config }
    }

    /// Spawn both loops; handles are aborted on shutdown
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        if !self.config.enabled {
            info!("sweeper disabled by config");
            return Vec::new();
        }

        let poll_engine = self.engine.clone();
        let poll_interval = self.config.poll_interval_secs;
        let min_age = self.config.min_age_secs;
        let poll = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(poll_interval));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                poll_pass(&poll_engine, min_age).await;
                if let Err(e) = poll_engine.effects().retry_failed(50).await {
                    error!(error = %e, "side effect retry pass failed");
                }
            }
        });

        let drift_engine = self.engine.clone();
        let drift_interval = self.config.drift_interval_secs;
        let drift = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(drift_interval));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                drift_pass(&drift_engine).await;
            }
        });

        info!(
            poll_interval_secs = poll_interval,
            drift_interval_secs = drift_interval,
            "sweeper started"
        );
        vec![poll, drift]
    }
}

/// Re-drive aged pendings on every pollable rail
pub async fn poll_pass(engine: &ReconEngine, min_age_secs: i64) {
    for rail in [PaymentRail::Card, PaymentRail::Invoice] {
        let pendings = match engine.store().list_pending_by_rail(rail, min_age_secs).await {
            Ok(p) => p,
            Err(e) => {
                error!(%rail, error = %e, "pending listing failed");
                continue;
            }
        };
        if pendings.is_empty() {
            continue;
        }
        debug!(%rail, count = pendings.len(), "re-driving pending transactions");
        for txn in pendings {
            match engine
                .settle(&txn.reference, VerifyProof::None, "sweeper")
                .await
            {
                Ok(outcome) => {
                    debug!(reference = %txn.reference, status = %outcome.transaction().status, "sweep verdict");
                }
                Err(e) => {
                    warn!(reference = %txn.reference, error = %e, "sweep settle failed");
                }
            }
        }
    }
}

/// Compare catalog counters with the journal's completed sums
pub async fn drift_pass(engine: &ReconEngine) {
    let store = engine.store();
    let (catalog, sums) = match tokio::try_join!(store.catalog(), store.completed_tier_sums()) {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "drift sweep reads failed");
            return;
        }
    };
    let (tier_sums, co_founder_sum) = sums;

    let mut drifted = false;
    let journal_tiers = [tier_sums.tier1, tier_sums.tier2, tier_sums.tier3];
    for (i, (tier, journal_sold)) in catalog.tiers.iter().zip(journal_tiers).enumerate() {
        if tier.sold != journal_sold {
            error!(
                tier = i + 1,
                catalog_sold = tier.sold,
                journal_sold,
                "catalog disagrees with journal"
            );
            drifted = true;
        }
    }
    if catalog.co_founder_sold != co_founder_sum {
        error!(
            catalog_sold = catalog.co_founder_sold,
            journal_sold = co_founder_sum,
            "co-founder counter disagrees with journal"
        );
        drifted = true;
    }

    if drifted {
        warn!("drift detected; the journal is authoritative, repair the catalog row");
    } else {
        debug!("drift sweep clean");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogSeedConfig;
    use crate::engine::side_effects::{LogNotifier, LogReferral, SideEffects};
    use crate::journal::ShareClass;
    use crate::money::Currency;
    use crate::rails::mock::MockRail;
    use crate::rails::{RailContext, RailOutcome, RailSet};
    use crate::store::ReconStore;
    use crate::store::mem::MemStore;
    use crate::journal::TxStatus;

    fn build_engine(card: Arc<MockRail>) -> Arc<ReconEngine> {
        let store: Arc<dyn ReconStore> = Arc::new(MemStore::new(&CatalogSeedConfig::default()));
        let rails = RailSet::new().register(PaymentRail::Card, card);
        let effects = SideEffects::new(
            store.clone(),
            Arc::new(LogReferral),
            Arc::new(LogNotifier {
                admin_email: "ops@example.com".to_string(),
            }),
        );
        Arc::new(ReconEngine::new(store, rails, effects))
    }

    fn ctx() -> RailContext {
        RailContext {
            user_id: 7,
            email: "buyer@example.com".to_string(),
            name: None,
        }
    }

    #[tokio::test]
    async fn test_poll_pass_settles_aged_pending() {
        let card = Arc::new(MockRail::new(PaymentRail::Card));
        let engine = build_engine(card.clone());

        let init = engine
            .initiate_purchase(
                7,
                ShareClass::Regular,
                10,
                Currency::Naira,
                PaymentRail::Card,
                &ctx(),
                None,
            )
            .await
            .unwrap();

        card.push_outcome(RailOutcome::settled());
        // min age 0 so the fresh pending qualifies
        poll_pass(&engine, 0).await;

        let txn = engine
            .store()
            .get_transaction(&init.transaction.reference)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(txn.status, TxStatus::Completed);
    }

    #[tokio::test]
    async fn test_poll_pass_skips_young_pending() {
        let card = Arc::new(MockRail::new(PaymentRail::Card));
        let engine = build_engine(card.clone());

        engine
            .initiate_purchase(
                7,
                ShareClass::Regular,
                10,
                Currency::Naira,
                PaymentRail::Card,
                &ctx(),
                None,
            )
            .await
            .unwrap();

        poll_pass(&engine, 3600).await;
        assert_eq!(card.verifications(), 0);
    }

    #[tokio::test]
    async fn test_drift_pass_on_clean_state() {
        let card = Arc::new(MockRail::new(PaymentRail::Card));
        let engine = build_engine(card.clone());

        let init = engine
            .initiate_purchase(
                7,
                ShareClass::Regular,
                10,
                Currency::Naira,
                PaymentRail::Card,
                &ctx(),
                None,
            )
            .await
            .unwrap();
        card.push_outcome(RailOutcome::settled());
        engine
            .settle(&init.transaction.reference, VerifyProof::None, "test")
            .await
            .unwrap();

        // Settlement path keeps catalog and journal in lockstep
        drift_pass(&engine).await;
        let (sums, _) = engine.store().completed_tier_sums().await.unwrap();
        let catalog = engine.store().catalog().await.unwrap();
        assert_eq!(catalog.tiers[0].sold, sums.tier1);
    }
}
