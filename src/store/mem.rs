//! In-memory Reconciliation Store
//!
//! Feature-gated mock of the PostgreSQL store for tests and dev mode.
//! A single mutex over the whole state gives the same atomicity the
//! PostgreSQL transactions give: a settlement unit either applies fully
//! or not at all.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{
    ReconStore, SettleResult, SettlementUpdate, SideEffectKind, SideEffectRecord, StoreError,
};
use crate::catalog::{PriceUpdate, PricingCatalog, TierLevel};
use crate::config::CatalogSeedConfig;
use crate::journal::{
    JournalFilter, JournalPage, JournalStats, PaymentRail, RailPayload, ShareClass, TierBreakdown,
    Transaction, TxStatus,
};
use crate::ledger::{LedgerEntry, UserShareLedger};
use crate::money::Currency;

#[derive(Default)]
struct MemState {
    catalog: Option<PricingCatalog>,
    /// Journal records plus insertion order for stable listings
    journal: HashMap<String, Transaction>,
    order: Vec<String>,
    ledgers: HashMap<i64, Vec<LedgerEntry>>,
    side_effects: HashMap<(String, i16), SideEffectRecord>,
}

/// In-memory store used by tests and `mock-api` dev runs
pub struct MemStore {
    state: Mutex<MemState>,
}

impl MemStore {
    pub fn new(seed: &CatalogSeedConfig) -> Self {
        let state = MemState {
            catalog: Some(PricingCatalog::from_seed(seed)),
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Start from an explicit catalog, for scenario tests
    pub fn with_catalog(catalog: PricingCatalog) -> Self {
        let state = MemState {
            catalog: Some(catalog),
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }
}

impl MemState {
    fn catalog_mut(&mut self) -> Result<&mut PricingCatalog, StoreError> {
        self.catalog
            .as_mut()
            .ok_or_else(|| StoreError::Corrupt("catalog not seeded".to_string()))
    }

    fn insert_journal_and_ledger(&mut self, txn: &Transaction) -> Result<(), StoreError> {
        if self.journal.contains_key(&txn.reference) {
            return Err(StoreError::DuplicateReference(txn.reference.clone()));
        }
        self.journal.insert(txn.reference.clone(), txn.clone());
        self.order.push(txn.reference.clone());
        self.ledgers
            .entry(txn.user_id)
            .or_default()
            .push(LedgerEntry::from_transaction(txn));
        Ok(())
    }

    fn sync_ledger_entry(&mut self, txn: &Transaction) {
        if let Some(entries) = self.ledgers.get_mut(&txn.user_id) {
            if let Some(entry) = entries.iter_mut().find(|e| e.reference == txn.reference) {
                entry.status = txn.status;
                entry.ratio_snapshot = txn.ratio_snapshot;
                if txn.status_note.is_some() {
                    entry.note = txn.status_note.clone();
                }
            }
        }
    }
}

#[async_trait]
impl ReconStore for MemStore {
    async fn catalog(&self) -> Result<PricingCatalog, StoreError> {
        let mut state = self.state.lock().await;
        let catalog = state.catalog_mut()?.clone();
        catalog.check_invariants()?;
        Ok(catalog)
    }

    async fn update_tier_price(
        &self,
        level: TierLevel,
        update: PriceUpdate,
    ) -> Result<PricingCatalog, StoreError> {
        let mut state = self.state.lock().await;
        let catalog = state.catalog_mut()?;
        catalog.apply_tier_price(level, &update)?;
        catalog.version += 1;
        Ok(catalog.clone())
    }

    async fn update_co_founder_price(
        &self,
        update: PriceUpdate,
    ) -> Result<PricingCatalog, StoreError> {
        let mut state = self.state.lock().await;
        let catalog = state.catalog_mut()?;
        catalog.apply_co_founder_price(&update)?;
        catalog.version += 1;
        Ok(catalog.clone())
    }

    async fn insert_pending(&self, txn: &Transaction) -> Result<(), StoreError> {
        if txn.status != TxStatus::Pending {
            return Err(StoreError::InvalidTransaction(
                "insert_pending requires pending status".to_string(),
            ));
        }
        txn.validate().map_err(StoreError::InvalidTransaction)?;

        let mut state = self.state.lock().await;
        state.insert_journal_and_ledger(txn)
    }

    async fn insert_settled(&self, txn: &Transaction) -> Result<Transaction, StoreError> {
        if txn.status != TxStatus::Completed {
            return Err(StoreError::InvalidTransaction(
                "insert_settled requires completed status".to_string(),
            ));
        }
        txn.validate().map_err(StoreError::InvalidTransaction)?;

        let mut state = self.state.lock().await;
        if state.journal.contains_key(&txn.reference) {
            return Err(StoreError::DuplicateReference(txn.reference.clone()));
        }

        let catalog = state.catalog_mut()?;
        catalog.apply_increment(txn.class, txn.shares, txn.tier_breakdown.as_ref())?;
        catalog.version += 1;
        let ratio = catalog.co_founder_to_regular_ratio;

        let mut stored = txn.clone();
        if stored.class == ShareClass::CoFounder {
            stored.ratio_snapshot = Some(ratio);
        }
        state.insert_journal_and_ledger(&stored)?;
        Ok(stored)
    }

    async fn set_rail_payload(
        &self,
        reference: &str,
        payload: &RailPayload,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let txn = state
            .journal
            .get_mut(reference)
            .ok_or_else(|| StoreError::NotFound(reference.to_string()))?;
        txn.rail_payload = payload.clone();
        Ok(())
    }

    async fn apply_settlement(
        &self,
        reference: &str,
        update: SettlementUpdate,
    ) -> Result<SettleResult, StoreError> {
        let mut state = self.state.lock().await;
        let txn = state
            .journal
            .get(reference)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(reference.to_string()))?;

        if txn.status.is_terminal() {
            return Ok(SettleResult::AlreadyTerminal(txn));
        }

        let mut updated = txn;
        match update {
            SettlementUpdate::Complete {
                settled_at,
                verifier_id,
                note,
                ..
            } => {
                // Checks first, so a supply failure leaves everything as-is
                let catalog = state.catalog_mut()?;
                catalog.apply_increment(
                    updated.class,
                    updated.shares,
                    updated.tier_breakdown.as_ref(),
                )?;
                catalog.version += 1;
                let ratio = catalog.co_founder_to_regular_ratio;

                updated.status = TxStatus::Completed;
                updated.settled_at = Some(settled_at);
                updated.verifier_id = verifier_id;
                updated.status_note = note;
                updated.ratio_snapshot =
                    (updated.class == ShareClass::CoFounder).then_some(ratio);

                state
                    .side_effects
                    .remove(&(reference.to_string(), SideEffectKind::ReferralRollback.id()));
            }
            SettlementUpdate::Fail {
                reason,
                verifier_id,
            } => {
                updated.status = TxStatus::Failed;
                updated.settled_at = Some(Utc::now());
                updated.verifier_id = verifier_id;
                updated.status_note = Some(reason);
            }
            SettlementUpdate::Cancel { reason } => {
                updated.status = TxStatus::Cancelled;
                updated.settled_at = Some(Utc::now());
                updated.status_note = Some(reason);
            }
        }

        state.journal.insert(reference.to_string(), updated.clone());
        state.sync_ledger_entry(&updated);
        Ok(SettleResult::Applied(updated))
    }

    async fn apply_reversal(
        &self,
        reference: &str,
        verifier_id: i64,
        note: &str,
    ) -> Result<SettleResult, StoreError> {
        let mut state = self.state.lock().await;
        let txn = state
            .journal
            .get(reference)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(reference.to_string()))?;

        if txn.status != TxStatus::Completed {
            return Ok(SettleResult::AlreadyTerminal(txn));
        }

        let catalog = state.catalog_mut()?;
        catalog.apply_decrement(txn.class, txn.shares, txn.tier_breakdown.as_ref())?;
        catalog.version += 1;

        let mut updated = txn;
        updated.status = TxStatus::Pending;
        updated.settled_at = None;
        updated.ratio_snapshot = None;
        updated.verifier_id = Some(verifier_id);
        updated.status_note = Some(note.to_string());

        state.journal.insert(reference.to_string(), updated.clone());
        state.sync_ledger_entry(&updated);
        for kind in [
            SideEffectKind::ReferralCommission,
            SideEffectKind::PurchaseEmail,
        ] {
            state
                .side_effects
                .remove(&(reference.to_string(), kind.id()));
        }
        Ok(SettleResult::Applied(updated))
    }

    async fn delete_transaction(&self, reference: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let removed = state.journal.remove(reference);
        state.order.retain(|r| r != reference);
        if let Some(txn) = &removed {
            if let Some(entries) = state.ledgers.get_mut(&txn.user_id) {
                entries.retain(|e| e.reference != *reference);
            }
        }
        Ok(removed.is_some())
    }

    async fn get_transaction(&self, reference: &str) -> Result<Option<Transaction>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.journal.get(reference).cloned())
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Transaction>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .journal
            .values()
            .find(|t| {
                matches!(
                    &t.rail_payload,
                    RailPayload::Invoice { order_id: oid, .. } if oid == order_id
                )
            })
            .cloned())
    }

    async fn list_pending_by_rail(
        &self,
        rail: PaymentRail,
        older_than_secs: i64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state.lock().await;
        let cutoff = Utc::now() - chrono::Duration::seconds(older_than_secs);
        Ok(state
            .order
            .iter()
            .filter_map(|r| state.journal.get(r))
            .filter(|t| t.rail == rail && t.status == TxStatus::Pending && t.created_at < cutoff)
            .cloned()
            .collect())
    }

    async fn list_by_user(
        &self,
        user_id: i64,
        class: Option<ShareClass>,
    ) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .order
            .iter()
            .filter_map(|r| state.journal.get(r))
            .filter(|t| t.user_id == user_id && class.is_none_or(|c| t.class == c))
            .cloned()
            .collect())
    }

    async fn list_page(&self, filter: &JournalFilter) -> Result<JournalPage, StoreError> {
        let state = self.state.lock().await;
        let (page, limit) = filter.page_bounds();

        let matching: Vec<&Transaction> = state
            .order
            .iter()
            .rev()
            .filter_map(|r| state.journal.get(r))
            .filter(|t| {
                filter.status.is_none_or(|s| t.status == s)
                    && filter.rail.is_none_or(|r| t.rail == r)
                    && filter.class.is_none_or(|c| t.class == c)
            })
            .collect();

        let total = matching.len() as i64;
        let start = ((page - 1) * limit) as usize;
        let items = matching
            .into_iter()
            .skip(start)
            .take(limit as usize)
            .cloned()
            .collect();

        Ok(JournalPage {
            items,
            total,
            page,
            limit,
        })
    }

    async fn journal_stats(&self) -> Result<JournalStats, StoreError> {
        let state = self.state.lock().await;
        let mut stats = JournalStats::default();
        for txn in state.journal.values() {
            match txn.status {
                TxStatus::Pending => stats.pending_count += 1,
                TxStatus::Completed => {
                    stats.completed_count += 1;
                    match txn.class {
                        ShareClass::Regular => stats.completed_regular_shares += txn.shares,
                        ShareClass::CoFounder => stats.completed_co_founder_shares += txn.shares,
                    }
                    match txn.currency {
                        Currency::Naira => stats.completed_naira_volume += txn.total_amount,
                        Currency::Usdt => stats.completed_usdt_volume += txn.total_amount,
                    }
                }
                TxStatus::Failed => stats.failed_count += 1,
                TxStatus::Cancelled => stats.cancelled_count += 1,
            }
        }
        Ok(stats)
    }

    async fn completed_tier_sums(&self) -> Result<(TierBreakdown, i64), StoreError> {
        let state = self.state.lock().await;
        let mut sums = TierBreakdown::default();
        let mut co_founder = 0i64;
        for txn in state.journal.values() {
            if txn.status != TxStatus::Completed {
                continue;
            }
            match txn.class {
                ShareClass::Regular => {
                    if let Some(b) = &txn.tier_breakdown {
                        sums.tier1 += b.tier1;
                        sums.tier2 += b.tier2;
                        sums.tier3 += b.tier3;
                    }
                }
                ShareClass::CoFounder => co_founder += txn.shares,
            }
        }
        Ok((sums, co_founder))
    }

    async fn user_ledger(&self, user_id: i64) -> Result<UserShareLedger, StoreError> {
        let state = self.state.lock().await;
        Ok(UserShareLedger {
            user_id,
            entries: state.ledgers.get(&user_id).cloned().unwrap_or_default(),
        })
    }

    async fn find_ledger_entry(
        &self,
        reference: &str,
    ) -> Result<Option<(i64, LedgerEntry)>, StoreError> {
        let state = self.state.lock().await;
        for (user_id, entries) in &state.ledgers {
            if let Some(entry) = entries.iter().find(|e| e.reference == reference) {
                return Ok(Some((*user_id, entry.clone())));
            }
        }
        Ok(None)
    }

    async fn remove_ledger_entry(
        &self,
        user_id: i64,
        reference: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(entries) = state.ledgers.get_mut(&user_id) else {
            return Ok(false);
        };
        let before = entries.len();
        entries.retain(|e| e.reference != reference);
        Ok(entries.len() < before)
    }

    async fn claim_side_effect(
        &self,
        reference: &str,
        kind: SideEffectKind,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let key = (reference.to_string(), kind.id());
        if state.side_effects.contains_key(&key) {
            return Ok(false);
        }
        state.side_effects.insert(
            key,
            SideEffectRecord {
                reference: reference.to_string(),
                kind,
                sent: false,
                attempts: 0,
                last_error: None,
                created_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn mark_side_effect(
        &self,
        reference: &str,
        kind: SideEffectKind,
        success: bool,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(record) = state
            .side_effects
            .get_mut(&(reference.to_string(), kind.id()))
        {
            record.sent = success;
            record.attempts += 1;
            record.last_error = error.map(str::to_string);
        }
        Ok(())
    }

    async fn clear_side_effect(
        &self,
        reference: &str,
        kind: SideEffectKind,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state
            .side_effects
            .remove(&(reference.to_string(), kind.id()));
        Ok(())
    }

    async fn list_failed_side_effects(
        &self,
        limit: i64,
    ) -> Result<Vec<SideEffectRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut failed: Vec<SideEffectRecord> = state
            .side_effects
            .values()
            .filter(|r| !r.sent && r.attempts > 0)
            .cloned()
            .collect();
        failed.sort_by_key(|r| r.created_at);
        failed.truncate(limit as usize);
        Ok(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn store() -> MemStore {
        MemStore::new(&CatalogSeedConfig::default())
    }

    fn pending_txn(reference: &str, user_id: i64, shares: i64) -> Transaction {
        Transaction {
            reference: reference.to_string(),
            user_id,
            class: ShareClass::Regular,
            rail: PaymentRail::Card,
            shares,
            price_per_share: Decimal::from(1000),
            currency: Currency::Naira,
            total_amount: Decimal::from(1000) * Decimal::from(shares),
            tier_breakdown: Some(TierBreakdown::new(shares, 0, 0)),
            status: TxStatus::Pending,
            rail_payload: RailPayload::None,
            ratio_snapshot: None,
            verifier_id: None,
            status_note: None,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    fn complete_update() -> SettlementUpdate {
        SettlementUpdate::Complete {
            settled_amount: None,
            settled_at: Utc::now(),
            verifier_id: None,
            note: None,
        }
    }

    #[tokio::test]
    async fn test_settlement_moves_all_three_stores() {
        let store = store();
        let txn = pending_txn("SHR-T1", 7, 100);
        store.insert_pending(&txn).await.unwrap();

        let ledger = store.user_ledger(7).await.unwrap();
        assert_eq!(ledger.pending_regular(), 100);
        assert_eq!(ledger.owned_regular(), 0);
        assert_eq!(store.catalog().await.unwrap().regular_sold(), 0);

        let result = store
            .apply_settlement("SHR-T1", complete_update())
            .await
            .unwrap();
        assert!(result.was_applied());

        let ledger = store.user_ledger(7).await.unwrap();
        assert_eq!(ledger.owned_regular(), 100);
        assert_eq!(ledger.pending_regular(), 0);
        assert_eq!(store.catalog().await.unwrap().regular_sold(), 100);
    }

    #[tokio::test]
    async fn test_duplicate_settlement_is_single_winner() {
        let store = store();
        store.insert_pending(&pending_txn("SHR-T2", 7, 50)).await.unwrap();

        let first = store
            .apply_settlement("SHR-T2", complete_update())
            .await
            .unwrap();
        let second = store
            .apply_settlement("SHR-T2", complete_update())
            .await
            .unwrap();

        assert!(first.was_applied());
        assert!(!second.was_applied());
        // Credited exactly once
        assert_eq!(store.catalog().await.unwrap().regular_sold(), 50);
        assert_eq!(store.user_ledger(7).await.unwrap().owned_regular(), 50);
    }

    #[tokio::test]
    async fn test_duplicate_reference_rejected() {
        let store = store();
        store.insert_pending(&pending_txn("SHR-T3", 7, 10)).await.unwrap();
        let err = store.insert_pending(&pending_txn("SHR-T3", 8, 20)).await;
        assert!(matches!(err, Err(StoreError::DuplicateReference(_))));
    }

    #[tokio::test]
    async fn test_reversal_decrements_and_reopens() {
        let store = store();
        store.insert_pending(&pending_txn("SHR-T4", 7, 30)).await.unwrap();
        store
            .apply_settlement("SHR-T4", complete_update())
            .await
            .unwrap();

        let result = store
            .apply_reversal("SHR-T4", 99, "chargeback")
            .await
            .unwrap();
        assert!(result.was_applied());
        assert_eq!(result.transaction().status, TxStatus::Pending);
        assert_eq!(store.catalog().await.unwrap().regular_sold(), 0);
        let ledger = store.user_ledger(7).await.unwrap();
        assert_eq!(ledger.owned_regular(), 0);
        assert_eq!(ledger.pending_regular(), 30);

        // Reversing again is a no-op
        let again = store.apply_reversal("SHR-T4", 99, "again").await.unwrap();
        assert!(!again.was_applied());
    }

    #[tokio::test]
    async fn test_settlement_fails_without_supply() {
        let store = store();
        let mut txn = pending_txn("SHR-T5", 7, 10);
        // Breakdown beyond tier1 capacity
        let capacity = store.catalog().await.unwrap().tiers[0].capacity;
        txn.shares = capacity + 1;
        txn.tier_breakdown = Some(TierBreakdown::new(capacity + 1, 0, 0));
        store.insert_pending(&txn).await.unwrap();

        let err = store.apply_settlement("SHR-T5", complete_update()).await;
        assert!(matches!(err, Err(StoreError::Catalog(_))));
        // Still pending, nothing credited
        let stored = store.get_transaction("SHR-T5").await.unwrap().unwrap();
        assert_eq!(stored.status, TxStatus::Pending);
        assert_eq!(store.catalog().await.unwrap().regular_sold(), 0);
    }

    #[tokio::test]
    async fn test_side_effect_claim_is_exactly_once() {
        let store = store();
        let claimed = store
            .claim_side_effect("SHR-T6", SideEffectKind::PurchaseEmail)
            .await
            .unwrap();
        let again = store
            .claim_side_effect("SHR-T6", SideEffectKind::PurchaseEmail)
            .await
            .unwrap();
        assert!(claimed);
        assert!(!again);
    }

    #[tokio::test]
    async fn test_reversal_rearms_completion_effects() {
        let store = store();
        store.insert_pending(&pending_txn("SHR-T7", 7, 5)).await.unwrap();
        store
            .apply_settlement("SHR-T7", complete_update())
            .await
            .unwrap();
        assert!(store
            .claim_side_effect("SHR-T7", SideEffectKind::PurchaseEmail)
            .await
            .unwrap());

        store.apply_reversal("SHR-T7", 1, "refund").await.unwrap();

        // The claim was cleared by the reversal
        assert!(store
            .claim_side_effect("SHR-T7", SideEffectKind::PurchaseEmail)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_admin_grant_insert_settled() {
        let store = store();
        let mut txn = pending_txn("CFD-G1", 9, 3);
        txn.reference = "CFD-G1".to_string();
        txn.class = ShareClass::CoFounder;
        txn.rail = PaymentRail::AdminGrant;
        txn.tier_breakdown = None;
        txn.status = TxStatus::Completed;
        txn.settled_at = Some(Utc::now());
        txn.total_amount = Decimal::ZERO;

        let stored = store.insert_settled(&txn).await.unwrap();
        assert_eq!(stored.ratio_snapshot, Some(29));

        let catalog = store.catalog().await.unwrap();
        assert_eq!(catalog.co_founder_sold, 3);
        assert!(catalog.ratio_frozen);
        assert_eq!(store.user_ledger(9).await.unwrap().owned_co_founder(), 3);
    }

    #[tokio::test]
    async fn test_find_by_order_id() {
        let store = store();
        let mut txn = pending_txn("SHR-T8", 7, 1);
        txn.rail = PaymentRail::Invoice;
        txn.rail_payload = RailPayload::Invoice {
            order_id: "ORD-123".to_string(),
            invoice_url: "https://pay.example/ORD-123".to_string(),
        };
        store.insert_pending(&txn).await.unwrap();

        let found = store.find_by_order_id("ORD-123").await.unwrap();
        assert_eq!(found.unwrap().reference, "SHR-T8");
        assert!(store.find_by_order_id("ORD-999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_page_filters() {
        let store = store();
        for i in 0..5 {
            let mut txn = pending_txn(&format!("SHR-P{i}"), 7, 1);
            if i % 2 == 0 {
                txn.rail = PaymentRail::ManualBank;
            }
            store.insert_pending(&txn).await.unwrap();
        }
        store
            .apply_settlement("SHR-P1", complete_update())
            .await
            .unwrap();

        let filter = JournalFilter {
            status: Some(TxStatus::Pending),
            rail: Some(PaymentRail::ManualBank),
            page: 1,
            limit: 10,
            ..Default::default()
        };
        let page = store.list_page(&filter).await.unwrap();
        assert_eq!(page.total, 3);
        assert!(page.items.iter().all(|t| t.rail == PaymentRail::ManualBank));
    }

    #[tokio::test]
    async fn test_completed_tier_sums_match_catalog() {
        let store = store();
        let mut txn = pending_txn("SHR-T9", 7, 300);
        txn.tier_breakdown = Some(TierBreakdown::new(200, 100, 0));
        store.insert_pending(&txn).await.unwrap();
        store
            .apply_settlement("SHR-T9", complete_update())
            .await
            .unwrap();

        let (sums, cf) = store.completed_tier_sums().await.unwrap();
        assert_eq!(sums, TierBreakdown::new(200, 100, 0));
        assert_eq!(cf, 0);

        let catalog = store.catalog().await.unwrap();
        assert_eq!(catalog.tiers[0].sold, sums.tier1);
        assert_eq!(catalog.tiers[1].sold, sums.tier2);
    }
}
