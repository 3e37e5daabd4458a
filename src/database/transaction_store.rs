// database/transaction_store.rs
use async_trait::async_trait;
use chrono::Utc;
use futures_util::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::ReturnDocument;
use mongodb::{Collection, Database};

use crate::errors::{AppError, Result};
use crate::models::transaction::{
    Transaction, TransactionStatus, TransactionSummary, Transition,
};

pub const COLLECTION_NAME: &str = "transactions";

/// How a transaction is addressed. Correlation ids match the mobile-push
/// request ids or the card session id; the payment-intent key is only used
/// by card webhook events.
#[derive(Debug, Clone, Copy)]
pub enum TransactionKey<'a> {
    Correlation(&'a str),
    PaymentIntent(&'a str),
}

impl TransactionKey<'_> {
    fn filter(&self) -> Document {
        match self {
            TransactionKey::Correlation(id) => doc! {
                "$or": [
                    { "checkout_request_id": id },
                    { "merchant_request_id": id },
                    { "stripe_session_id": id },
                ]
            },
            TransactionKey::PaymentIntent(id) => doc! { "stripe_payment_intent_id": id },
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub email: Option<String>,
    pub status: Option<TransactionStatus>,
    pub limit: Option<i64>,
    pub page: Option<i64>,
}

/// Result of a transition attempt. `applied` is true only when this call
/// performed the write; a no-op against a record already past the allowed
/// source states returns the current record with `applied` false. Callers
/// deciding on one-shot side effects (the confirmation email) key off
/// `applied`, not off a before/after status comparison, so two racing
/// triggers cannot both claim the transition.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub transaction: Transaction,
    pub applied: bool,
}

/// Persistent mapping of payment attempts, keyed by provider-issued
/// correlation ids.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Fails with `DuplicateKey` if any correlation id already exists; the
    /// existing record is left untouched.
    async fn create(&self, tx: Transaction) -> Result<Transaction>;

    async fn find(&self, key: TransactionKey<'_>) -> Result<Option<Transaction>>;

    /// All transactions for a customer, most recent first.
    async fn find_by_email(&self, email: &str) -> Result<Vec<Transaction>>;

    /// Atomic read-modify-write. The update only takes effect when the
    /// record's current status is an allowed source for the target status;
    /// otherwise the record is returned unchanged (idempotent no-op, with
    /// `applied` false). `NotFound` only when no record matches the key.
    async fn apply_transition(&self, key: TransactionKey<'_>, change: Transition)
        -> Result<TransitionOutcome>;

    /// Filtered page of transactions plus the total match count.
    async fn list(&self, filter: TransactionFilter) -> Result<(Vec<Transaction>, u64)>;

    async fn summary(&self) -> Result<TransactionSummary>;

    /// Pending records older than the cutoff, oldest first.
    async fn find_stale_pending(&self, older_than_minutes: i64) -> Result<Vec<Transaction>>;
}

#[derive(Clone)]
pub struct MongoTransactionStore {
    collection: Collection<Transaction>,
}

impl MongoTransactionStore {
    pub fn new(db: &Database) -> Self {
        MongoTransactionStore {
            collection: db.collection(COLLECTION_NAME),
        }
    }
}

fn is_duplicate_key_error(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == 11000
    )
}

fn transition_update(change: &Transition) -> Document {
    let mut set = doc! {
        "updated_at": mongodb::bson::DateTime::from_chrono(Utc::now()),
    };
    if let Some(status) = &change.status {
        set.insert("status", status.as_str());
    }
    if let Some(code) = &change.result_code {
        set.insert("result_code", code);
    }
    if let Some(desc) = &change.result_desc {
        set.insert("result_desc", desc);
    }
    if let Some(reference) = &change.provider_reference {
        set.insert("provider_reference", reference);
    }
    if let Some(intent_id) = &change.payment_intent_id {
        set.insert("stripe_payment_intent_id", intent_id);
    }
    if let Some(amount) = change.amount {
        set.insert("amount", amount);
    }
    if let Some(currency) = &change.currency {
        set.insert("currency", currency);
    }
    if let Some(discount) = change.discount_amount {
        set.insert("discount_amount", discount);
    }
    if let Some(refund) = change.refund_amount {
        set.insert("refund_amount", refund);
    }
    if let Some(refunded_at) = change.refunded_at {
        set.insert("refunded_at", refunded_at.to_rfc3339());
    }
    if let Some(settled_at) = change.settled_at {
        set.insert("settled_at", settled_at.to_rfc3339());
    }
    doc! { "$set": set }
}

#[async_trait]
impl TransactionStore for MongoTransactionStore {
    async fn create(&self, mut tx: Transaction) -> Result<Transaction> {
        tx.id.get_or_insert_with(ObjectId::new);

        match self.collection.insert_one(&tx).await {
            Ok(_) => Ok(tx),
            Err(e) if is_duplicate_key_error(&e) => Err(AppError::DuplicateKey),
            Err(e) => Err(e.into()),
        }
    }

    async fn find(&self, key: TransactionKey<'_>) -> Result<Option<Transaction>> {
        Ok(self.collection.find_one(key.filter()).await?)
    }

    async fn find_by_email(&self, email: &str) -> Result<Vec<Transaction>> {
        let filter = doc! { "customer.email": email.to_lowercase() };
        let cursor = self.collection.find(filter).await?;
        let mut transactions: Vec<Transaction> = cursor.try_collect().await?;
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(transactions)
    }

    async fn apply_transition(
        &self,
        key: TransactionKey<'_>,
        change: Transition,
    ) -> Result<TransitionOutcome> {
        let target = change.target_status();
        let sources: Vec<&str> = target.allowed_sources().iter().map(|s| s.as_str()).collect();

        let mut filter = key.filter();
        filter.insert("status", doc! { "$in": sources });

        let updated = self
            .collection
            .find_one_and_update(filter, transition_update(&change))
            .return_document(ReturnDocument::After)
            .await?;

        match updated {
            Some(tx) => Ok(TransitionOutcome { transaction: tx, applied: true }),
            // No matching source state: the record is already terminal (or
            // absent). Re-applying a terminal outcome is a no-op, not an
            // error.
            None => {
                let tx = self.find(key).await?.ok_or(AppError::NotFound)?;
                Ok(TransitionOutcome { transaction: tx, applied: false })
            }
        }
    }

    async fn list(&self, filter: TransactionFilter) -> Result<(Vec<Transaction>, u64)> {
        let mut query = doc! {};
        if let Some(email) = &filter.email {
            query.insert("customer.email", email.to_lowercase());
        }
        if let Some(status) = &filter.status {
            query.insert("status", status.as_str());
        }

        let cursor = self.collection.find(query).await?;
        let mut transactions: Vec<Transaction> = cursor.try_collect().await?;
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = transactions.len() as u64;
        let limit = filter.limit.unwrap_or(50).max(1) as usize;
        let page = filter.page.unwrap_or(1).max(1) as usize;
        let page_items = transactions
            .into_iter()
            .skip((page - 1) * limit)
            .take(limit)
            .collect();

        Ok((page_items, total))
    }

    async fn summary(&self) -> Result<TransactionSummary> {
        let cursor = self.collection.find(doc! {}).await?;
        let transactions: Vec<Transaction> = cursor.try_collect().await?;
        Ok(summarize(&transactions))
    }

    async fn find_stale_pending(&self, older_than_minutes: i64) -> Result<Vec<Transaction>> {
        let cutoff = Utc::now() - chrono::Duration::minutes(older_than_minutes);
        let filter = doc! {
            "status": TransactionStatus::Pending.as_str(),
            "created_at": { "$lt": mongodb::bson::DateTime::from_chrono(cutoff) },
        };
        let cursor = self.collection.find(filter).await?;
        let mut transactions: Vec<Transaction> = cursor.try_collect().await?;
        transactions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(transactions)
    }
}

pub(crate) fn summarize(transactions: &[Transaction]) -> TransactionSummary {
    let mut summary = TransactionSummary {
        total_transactions: transactions.len() as u64,
        ..Default::default()
    };

    let mut emails: Vec<&str> = Vec::new();
    for tx in transactions {
        match tx.status {
            TransactionStatus::Pending => summary.pending += 1,
            TransactionStatus::Succeeded => {
                summary.succeeded += 1;
                summary.total_revenue += tx.amount;
            }
            TransactionStatus::Failed => summary.failed += 1,
            TransactionStatus::Refunded => summary.refunded += 1,
            TransactionStatus::Cancelled => summary.cancelled += 1,
        }
        emails.push(tx.customer.email.as_str());
    }
    emails.sort_unstable();
    emails.dedup();
    summary.unique_customers = emails.len() as u64;

    summary
}
