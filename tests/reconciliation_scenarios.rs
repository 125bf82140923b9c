//! End-to-end reconciliation scenarios against the in-memory store
//! and scriptable rails.

use std::sync::Arc;

use shareledger::catalog::Tier;
use shareledger::config::CatalogSeedConfig;
use shareledger::engine::{LogNotifier, LogReferral, ReconEngine, SettleOutcome, SideEffects};
use shareledger::journal::{PaymentRail, ShareClass, TierBreakdown, TxStatus};
use shareledger::money::Currency;
use shareledger::rails::mock::MockRail;
use shareledger::rails::{RailContext, RailOutcome, RailSet, VerifyProof};
use shareledger::store::mem::MemStore;
use shareledger::store::ReconStore;
use shareledger::view;
use shareledger::PricingCatalog;
use rust_decimal::Decimal;

struct Harness {
    engine: Arc<ReconEngine>,
    store: Arc<dyn ReconStore>,
    card: Arc<MockRail>,
    onchain: Arc<MockRail>,
}

/// Small launch catalog: 1000 @ 1000, 500 @ 1500, 500 @ 2000; ratio 29
fn launch_catalog() -> PricingCatalog {
    let mut c = PricingCatalog::from_seed(&CatalogSeedConfig::default());
    c.tiers = [
        Tier {
            capacity: 1000,
            sold: 0,
            price_naira: Decimal::from(1000),
            price_usdt: Decimal::from(5),
        },
        Tier {
            capacity: 500,
            sold: 0,
            price_naira: Decimal::from(1500),
            price_usdt: Decimal::from(7),
        },
        Tier {
            capacity: 500,
            sold: 0,
            price_naira: Decimal::from(2000),
            price_usdt: Decimal::from(9),
        },
    ];
    c.co_founder_total = 100;
    c
}

fn harness() -> Harness {
    let store: Arc<dyn ReconStore> = Arc::new(MemStore::with_catalog(launch_catalog()));
    let card = Arc::new(MockRail::new(PaymentRail::Card));
    let onchain = Arc::new(MockRail::new(PaymentRail::Onchain));
    let rails = RailSet::new()
        .register(PaymentRail::Card, card.clone())
        .register(PaymentRail::Onchain, onchain.clone());
    let effects = SideEffects::new(
        store.clone(),
        Arc::new(LogReferral),
        Arc::new(LogNotifier {
            admin_email: "ops@example.com".to_string(),
        }),
    );
    Harness {
        engine: Arc::new(ReconEngine::new(store.clone(), rails, effects)),
        store,
        card,
        onchain,
    }
}

fn ctx(user_id: i64) -> RailContext {
    RailContext {
        user_id,
        email: format!("user{}@example.com", user_id),
        name: None,
    }
}

async fn buy(
    h: &Harness,
    user_id: i64,
    class: ShareClass,
    quantity: i64,
    rail: PaymentRail,
) -> String {
    h.engine
        .initiate_purchase(
            user_id,
            class,
            quantity,
            Currency::Naira,
            rail,
            &ctx(user_id),
            None,
        )
        .await
        .expect("initiation failed")
        .transaction
        .reference
}

#[tokio::test]
async fn scenario_tiered_purchase_settles_across_stores() {
    let h = harness();
    let reference = buy(&h, 1, ShareClass::Regular, 1200, PaymentRail::Card).await;

    // Pending purchases never touch the catalog counters
    let catalog = h.store.catalog().await.unwrap();
    assert_eq!(catalog.tiers[0].sold, 0);

    h.card.push_outcome(RailOutcome::settled());
    let outcome = h
        .engine
        .settle(&reference, VerifyProof::None, "webhook")
        .await
        .unwrap();
    assert!(matches!(outcome, SettleOutcome::Completed(_)));

    let txn = h.store.get_transaction(&reference).await.unwrap().unwrap();
    assert_eq!(txn.status, TxStatus::Completed);
    assert_eq!(txn.tier_breakdown, Some(TierBreakdown::new(1000, 200, 0)));
    assert_eq!(txn.total_amount, Decimal::from(1_300_000));

    let catalog = h.store.catalog().await.unwrap();
    assert_eq!(catalog.tiers[0].sold, 1000);
    assert_eq!(catalog.tiers[1].sold, 200);

    let ledger = h.store.user_ledger(1).await.unwrap();
    assert_eq!(ledger.owned_regular(), 1200);

    let txns = h.store.list_by_user(1, None).await.unwrap();
    let view = view::project_user(1, &txns, catalog.co_founder_to_regular_ratio);
    assert_eq!(view.effective_regular, 1200);
}

#[tokio::test]
async fn scenario_racing_settlements_credit_once() {
    let h = harness();
    let reference = buy(&h, 2, ShareClass::Regular, 50, PaymentRail::Card).await;

    // Webhook, sweeper and a user refresh all observe success
    for _ in 0..3 {
        h.card.push_outcome(RailOutcome::settled());
    }

    let (a, b, c) = tokio::join!(
        h.engine.settle(&reference, VerifyProof::None, "webhook"),
        h.engine.settle(&reference, VerifyProof::None, "sweeper"),
        h.engine.settle(&reference, VerifyProof::None, "user"),
    );
    let outcomes = [a.unwrap(), b.unwrap(), c.unwrap()];
    let completions = outcomes
        .iter()
        .filter(|o| matches!(o, SettleOutcome::Completed(_)))
        .count();
    assert_eq!(completions, 1, "exactly one caller wins the settlement");

    let catalog = h.store.catalog().await.unwrap();
    assert_eq!(catalog.tiers[0].sold, 50);
    let ledger = h.store.user_ledger(2).await.unwrap();
    assert_eq!(ledger.owned_regular(), 50);
}

#[tokio::test]
async fn scenario_onchain_rejection_held_for_admin() {
    let h = harness();
    let reference = buy(&h, 3, ShareClass::Regular, 10, PaymentRail::Onchain).await;

    h.onchain
        .push_outcome(RailOutcome::rejected("amount below tolerance"));
    let outcome = h
        .engine
        .settle(
            &reference,
            VerifyProof::Onchain {
                tx_hash: format!("0x{}", "ab".repeat(32)),
                sender_wallet: format!("0x{}", "cd".repeat(20)),
            },
            "user",
        )
        .await
        .unwrap();

    // Automated rejection on-chain never writes a terminal state
    assert!(matches!(outcome, SettleOutcome::Pending { .. }));
    let txn = h.store.get_transaction(&reference).await.unwrap().unwrap();
    assert_eq!(txn.status, TxStatus::Pending);

    // The admin override completes it
    let outcome = h
        .engine
        .admin_decide(&reference, 99, true, Some("verified on explorer".to_string()))
        .await
        .unwrap();
    assert!(matches!(outcome, SettleOutcome::Completed(_)));
    let txn = h.store.get_transaction(&reference).await.unwrap().unwrap();
    assert_eq!(txn.verifier_id, Some(99));
}

#[tokio::test]
async fn scenario_reversal_reopens_and_returns_supply() {
    let h = harness();
    let reference = buy(&h, 4, ShareClass::Regular, 300, PaymentRail::Card).await;
    h.card.push_outcome(RailOutcome::settled());
    h.engine
        .settle(&reference, VerifyProof::None, "webhook")
        .await
        .unwrap();

    let outcome = h.engine.reverse(&reference, 99, "chargeback").await.unwrap();
    assert!(matches!(outcome, SettleOutcome::Pending { .. }));

    let catalog = h.store.catalog().await.unwrap();
    assert_eq!(catalog.tiers[0].sold, 0);
    let ledger = h.store.user_ledger(4).await.unwrap();
    assert_eq!(ledger.owned_regular(), 0);

    // A fresh verdict can settle it again
    h.card.push_outcome(RailOutcome::settled());
    let outcome = h
        .engine
        .settle(&reference, VerifyProof::None, "sweeper")
        .await
        .unwrap();
    assert!(matches!(outcome, SettleOutcome::Completed(_)));
    assert_eq!(h.store.user_ledger(4).await.unwrap().owned_regular(), 300);
}

#[tokio::test]
async fn scenario_settlement_rechecks_supply() {
    let h = harness();
    // Two pendings that together exceed the 2000-share total
    let first = buy(&h, 5, ShareClass::Regular, 1500, PaymentRail::Card).await;
    let second = buy(&h, 6, ShareClass::Regular, 1000, PaymentRail::Card).await;

    h.card.push_outcome(RailOutcome::settled());
    h.engine
        .settle(&first, VerifyProof::None, "webhook")
        .await
        .unwrap();

    // The second payment landed but the shares are gone
    h.card.push_outcome(RailOutcome::settled());
    let result = h.engine.settle(&second, VerifyProof::None, "webhook").await;
    assert!(result.is_err());

    let txn = h.store.get_transaction(&second).await.unwrap().unwrap();
    assert_eq!(txn.status, TxStatus::Pending, "needs admin resolution");
    let catalog = h.store.catalog().await.unwrap();
    assert_eq!(
        catalog.tiers[0].sold + catalog.tiers[1].sold + catalog.tiers[2].sold,
        1500
    );
}

#[tokio::test]
async fn scenario_grant_and_cofounder_equivalents() {
    let h = harness();

    // Paid co-founder purchase
    let reference = buy(&h, 7, ShareClass::CoFounder, 2, PaymentRail::Card).await;
    h.card.push_outcome(RailOutcome::settled());
    h.engine
        .settle(&reference, VerifyProof::None, "webhook")
        .await
        .unwrap();

    // Granted regular shares charge nothing
    let grant = h
        .engine
        .grant(99, 7, ShareClass::Regular, 42, Currency::Naira, "advisor award")
        .await
        .unwrap();
    assert_eq!(grant.rail, PaymentRail::AdminGrant);
    assert_eq!(grant.total_amount, Decimal::ZERO);
    assert!(grant.price_per_share > Decimal::ZERO);

    let catalog = h.store.catalog().await.unwrap();
    assert_eq!(catalog.co_founder_sold, 2);
    assert_eq!(catalog.tiers[0].sold, 42);

    let txns = h.store.list_by_user(7, None).await.unwrap();
    let view = view::project_user(7, &txns, catalog.co_founder_to_regular_ratio);
    assert_eq!(view.co_founder_shares, 2);
    assert_eq!(view.regular_shares, 42);
    // 42 + 2 * 29
    assert_eq!(view.effective_regular, 100);
    assert_eq!(view.equivalent_co_founder, 3);
    assert_eq!(view.equivalent_remainder, 13);
}

#[tokio::test]
async fn scenario_price_change_never_rescales_history() {
    let h = harness();
    let reference = buy(&h, 8, ShareClass::Regular, 100, PaymentRail::Card).await;
    let quoted = h
        .store
        .get_transaction(&reference)
        .await
        .unwrap()
        .unwrap()
        .total_amount;

    h.store
        .update_tier_price(
            shareledger::TierLevel::Tier1,
            shareledger::catalog::PriceUpdate {
                price_naira: Some(Decimal::from(9999)),
                price_usdt: None,
            },
        )
        .await
        .unwrap();

    h.card.push_outcome(RailOutcome::settled());
    h.engine
        .settle(&reference, VerifyProof::None, "webhook")
        .await
        .unwrap();

    let txn = h.store.get_transaction(&reference).await.unwrap().unwrap();
    assert_eq!(txn.total_amount, quoted, "settled at the quoted price");
}

#[tokio::test]
async fn scenario_initiation_lanes_do_not_accumulate() {
    let h = harness();
    for user_id in 10..30 {
        buy(&h, user_id, ShareClass::Regular, 1, PaymentRail::Card).await;
    }
    h.engine
        .grant(99, 30, ShareClass::Regular, 5, Currency::Naira, "award")
        .await
        .unwrap();

    // Idle lanes are evicted once the initiation finishes
    assert_eq!(h.engine.lane_count(), 0);
}

#[tokio::test]
async fn scenario_cancelled_purchase_is_terminal() {
    let h = harness();
    let reference = buy(&h, 9, ShareClass::Regular, 10, PaymentRail::Card).await;

    let outcome = h.engine.cancel(&reference, "abandoned checkout").await.unwrap();
    assert!(matches!(outcome, SettleOutcome::Cancelled(_)));
    let txn = h.store.get_transaction(&reference).await.unwrap().unwrap();
    assert_eq!(txn.status, TxStatus::Cancelled);

    // A late success verdict cannot resurrect it
    h.card.push_outcome(RailOutcome::settled());
    let outcome = h
        .engine
        .settle(&reference, VerifyProof::None, "webhook")
        .await
        .unwrap();
    assert!(matches!(outcome, SettleOutcome::AlreadyTerminal(_)));
    assert_eq!(h.store.catalog().await.unwrap().tiers[0].sold, 0);
}
