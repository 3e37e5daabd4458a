// database/memory_store.rs
//
// In-memory TransactionStore used by the reconciliation tests. Mirrors the
// Mongo implementation's transition semantics; the mutex stands in for the
// document-level atomicity of find_one_and_update.
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use mongodb::bson::oid::ObjectId;

use crate::database::transaction_store::{
    summarize, TransactionFilter, TransactionKey, TransactionStore, TransitionOutcome,
};
use crate::errors::{AppError, Result};
use crate::models::transaction::{Transaction, TransactionStatus, TransactionSummary, Transition};

#[derive(Default)]
pub struct MemoryTransactionStore {
    records: Mutex<Vec<Transaction>>,
}

impl MemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_key(tx: &Transaction, key: TransactionKey<'_>) -> bool {
    match key {
        TransactionKey::Correlation(id) => {
            tx.checkout_request_id.as_deref() == Some(id)
                || tx.merchant_request_id.as_deref() == Some(id)
                || tx.stripe_session_id.as_deref() == Some(id)
        }
        TransactionKey::PaymentIntent(id) => tx.stripe_payment_intent_id.as_deref() == Some(id),
    }
}

fn collides(existing: &Transaction, new: &Transaction) -> bool {
    fn same(a: &Option<String>, b: &Option<String>) -> bool {
        matches!((a, b), (Some(x), Some(y)) if x == y)
    }
    same(&existing.checkout_request_id, &new.checkout_request_id)
        || same(&existing.merchant_request_id, &new.merchant_request_id)
        || same(&existing.stripe_session_id, &new.stripe_session_id)
}

fn apply(tx: &mut Transaction, change: &Transition) {
    if let Some(status) = change.status {
        tx.status = status;
    }
    if let Some(code) = &change.result_code {
        tx.result_code = Some(code.clone());
    }
    if let Some(desc) = &change.result_desc {
        tx.result_desc = Some(desc.clone());
    }
    if let Some(reference) = &change.provider_reference {
        tx.provider_reference = Some(reference.clone());
    }
    if let Some(intent_id) = &change.payment_intent_id {
        tx.stripe_payment_intent_id = Some(intent_id.clone());
    }
    if let Some(amount) = change.amount {
        tx.amount = amount;
    }
    if let Some(currency) = &change.currency {
        tx.currency = currency.clone();
    }
    if let Some(discount) = change.discount_amount {
        tx.discount_amount = discount;
    }
    if let Some(refund) = change.refund_amount {
        tx.refund_amount = refund;
    }
    if let Some(refunded_at) = change.refunded_at {
        tx.refunded_at = Some(refunded_at);
    }
    if let Some(settled_at) = change.settled_at {
        tx.settled_at = Some(settled_at);
    }
    tx.updated_at = Utc::now();
}

#[async_trait]
impl TransactionStore for MemoryTransactionStore {
    async fn create(&self, mut tx: Transaction) -> Result<Transaction> {
        let mut records = self.records.lock().unwrap();
        if records.iter().any(|existing| collides(existing, &tx)) {
            return Err(AppError::DuplicateKey);
        }
        tx.id.get_or_insert_with(ObjectId::new);
        records.push(tx.clone());
        Ok(tx)
    }

    async fn find(&self, key: TransactionKey<'_>) -> Result<Option<Transaction>> {
        let records = self.records.lock().unwrap();
        Ok(records.iter().find(|tx| matches_key(tx, key)).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Vec<Transaction>> {
        let records = self.records.lock().unwrap();
        let mut matched: Vec<Transaction> = records
            .iter()
            .filter(|tx| tx.customer.email == email.to_lowercase())
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }

    async fn apply_transition(
        &self,
        key: TransactionKey<'_>,
        change: Transition,
    ) -> Result<TransitionOutcome> {
        let mut records = self.records.lock().unwrap();
        let tx = records
            .iter_mut()
            .find(|tx| matches_key(tx, key))
            .ok_or(AppError::NotFound)?;

        let target = change.target_status();
        let applied = target.allowed_sources().contains(&tx.status);
        if applied {
            apply(tx, &change);
        }
        Ok(TransitionOutcome { transaction: tx.clone(), applied })
    }

    async fn list(&self, filter: TransactionFilter) -> Result<(Vec<Transaction>, u64)> {
        let records = self.records.lock().unwrap();
        let mut matched: Vec<Transaction> = records
            .iter()
            .filter(|tx| {
                filter
                    .email
                    .as_ref()
                    .map_or(true, |email| tx.customer.email == email.to_lowercase())
                    && filter.status.map_or(true, |status| tx.status == status)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matched.len() as u64;
        let limit = filter.limit.unwrap_or(50).max(1) as usize;
        let page = filter.page.unwrap_or(1).max(1) as usize;
        let page_items = matched
            .into_iter()
            .skip((page - 1) * limit)
            .take(limit)
            .collect();
        Ok((page_items, total))
    }

    async fn summary(&self) -> Result<TransactionSummary> {
        let records = self.records.lock().unwrap();
        Ok(summarize(&records))
    }

    async fn find_stale_pending(&self, older_than_minutes: i64) -> Result<Vec<Transaction>> {
        let cutoff = Utc::now() - chrono::Duration::minutes(older_than_minutes);
        let records = self.records.lock().unwrap();
        let mut stale: Vec<Transaction> = records
            .iter()
            .filter(|tx| tx.status == TransactionStatus::Pending && tx.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::transaction::CustomerInfo;

    fn customer(email: &str) -> CustomerInfo {
        CustomerInfo {
            first_name: "Test".to_string(),
            last_name: "Buyer".to_string(),
            email: email.to_string(),
            phone: "254712345678".to_string(),
            country: "KE".to_string(),
            company: None,
            job_title: None,
        }
    }

    fn pending(checkout_request_id: &str, email: &str) -> Transaction {
        Transaction::new_mpesa_pending(
            format!("mr_{}", checkout_request_id),
            checkout_request_id.to_string(),
            100.0,
            customer(email),
            Some("TICKET".into()),
            None,
            None,
            None,
        )
    }

    #[tokio::test]
    async fn duplicate_correlation_id_fails_second_create() {
        let store = MemoryTransactionStore::new();
        store.create(pending("CRQ1", "a@example.com")).await.unwrap();

        let err = store
            .create(pending("CRQ1", "b@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateKey));

        // First record unaffected
        let first = store
            .find(TransactionKey::Correlation("CRQ1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.customer.email, "a@example.com");
    }

    #[tokio::test]
    async fn transition_respects_terminal_monotonicity() {
        let store = MemoryTransactionStore::new();
        store.create(pending("CRQ1", "a@example.com")).await.unwrap();

        let key = TransactionKey::Correlation("CRQ1");
        let outcome = store
            .apply_transition(key, Transition::to(TransactionStatus::Failed).with_result("1", "fail"))
            .await
            .unwrap();
        assert!(outcome.applied);
        assert_eq!(outcome.transaction.status, TransactionStatus::Failed);

        // Failed is final: a later success verdict is a no-op
        let outcome = store
            .apply_transition(key, Transition::to(TransactionStatus::Succeeded).with_result("0", "ok"))
            .await
            .unwrap();
        assert!(!outcome.applied);
        assert_eq!(outcome.transaction.status, TransactionStatus::Failed);
        assert_eq!(outcome.transaction.result_code.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn only_one_of_repeated_transitions_reports_applied() {
        let store = MemoryTransactionStore::new();
        store.create(pending("CRQ1", "a@example.com")).await.unwrap();
        let key = TransactionKey::Correlation("CRQ1");

        let first = store
            .apply_transition(key, Transition::to(TransactionStatus::Succeeded).with_result("0", "ok"))
            .await
            .unwrap();
        let second = store
            .apply_transition(key, Transition::to(TransactionStatus::Succeeded).with_result("0", "ok"))
            .await
            .unwrap();

        assert!(first.applied);
        assert!(!second.applied);
        assert_eq!(second.transaction.status, TransactionStatus::Succeeded);
    }

    #[tokio::test]
    async fn refund_only_moves_succeeded_records() {
        let store = MemoryTransactionStore::new();
        store.create(pending("CRQ1", "a@example.com")).await.unwrap();
        let key = TransactionKey::Correlation("CRQ1");

        // Refund on a pending record is a no-op
        let outcome = store
            .apply_transition(key, Transition::to(TransactionStatus::Refunded))
            .await
            .unwrap();
        assert!(!outcome.applied);
        assert_eq!(outcome.transaction.status, TransactionStatus::Pending);

        store
            .apply_transition(key, Transition::to(TransactionStatus::Succeeded).with_result("0", "ok"))
            .await
            .unwrap();
        let outcome = store
            .apply_transition(key, Transition::to(TransactionStatus::Refunded).with_result("0", "refunded"))
            .await
            .unwrap();
        assert!(outcome.applied);
        assert_eq!(outcome.transaction.status, TransactionStatus::Refunded);
    }

    #[tokio::test]
    async fn transition_on_unknown_key_is_not_found() {
        let store = MemoryTransactionStore::new();
        let err = store
            .apply_transition(
                TransactionKey::Correlation("missing"),
                Transition::to(TransactionStatus::Failed),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }

    #[tokio::test]
    async fn find_by_email_returns_most_recent_first() {
        let store = MemoryTransactionStore::new();
        let mut older = pending("CRQ1", "a@example.com");
        older.created_at = Utc::now() - chrono::Duration::hours(2);
        store.create(older).await.unwrap();
        store.create(pending("CRQ2", "a@example.com")).await.unwrap();
        store.create(pending("CRQ3", "other@example.com")).await.unwrap();

        let found = store.find_by_email("A@example.com").await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].checkout_request_id.as_deref(), Some("CRQ2"));
        assert_eq!(found[1].checkout_request_id.as_deref(), Some("CRQ1"));
    }

    #[tokio::test]
    async fn summary_counts_by_status_and_revenue() {
        let store = MemoryTransactionStore::new();
        store.create(pending("CRQ1", "a@example.com")).await.unwrap();
        store.create(pending("CRQ2", "a@example.com")).await.unwrap();
        store
            .apply_transition(
                TransactionKey::Correlation("CRQ1"),
                Transition::to(TransactionStatus::Succeeded).with_result("0", "ok"),
            )
            .await
            .unwrap();

        let summary = store.summary().await.unwrap();
        assert_eq!(summary.total_transactions, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.total_revenue, 100.0);
        assert_eq!(summary.unique_customers, 1);
    }

    #[tokio::test]
    async fn stale_pending_uses_created_at_cutoff() {
        let store = MemoryTransactionStore::new();
        let mut old = pending("CRQ_OLD", "a@example.com");
        old.created_at = Utc::now() - chrono::Duration::minutes(30);
        store.create(old).await.unwrap();
        store.create(pending("CRQ_NEW", "a@example.com")).await.unwrap();

        let stale = store.find_stale_pending(5).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].checkout_request_id.as_deref(), Some("CRQ_OLD"));
    }
}
