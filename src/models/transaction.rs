// models/transaction.rs
use chrono::{DateTime, Utc};
use mongodb::bson;
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of one payment attempt.
///
/// `pending` may move to `succeeded`, `failed` or `cancelled`; `succeeded`
/// may move to `refunded`; every other state is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Succeeded,
    Failed,
    Refunded,
    Cancelled,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Succeeded => "succeeded",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refunded => "refunded",
            TransactionStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses a record may currently be in for a transition into `self`
    /// to take effect. Anything else is an idempotent no-op.
    pub fn allowed_sources(&self) -> &'static [TransactionStatus] {
        match self {
            TransactionStatus::Pending => &[TransactionStatus::Pending],
            TransactionStatus::Succeeded => &[TransactionStatus::Pending],
            TransactionStatus::Failed => &[TransactionStatus::Pending],
            TransactionStatus::Cancelled => &[TransactionStatus::Pending],
            TransactionStatus::Refunded => &[TransactionStatus::Succeeded],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentRail {
    Mpesa,
    Card,
}

/// Buyer identity captured at initiation time. Immutable afterwards; only
/// re-derived from provider data as a metadata parse-failure fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub country: String,
    pub company: Option<String>,
    pub job_title: Option<String>,
}

impl CustomerInfo {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Customer identity block as the checkout frontend sends it.
#[derive(Debug, Clone, Serialize, Deserialize, validator::Validate)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInfoDto {
    #[validate(length(min = 1, message = "firstName is required"))]
    pub first_name: String,
    #[validate(length(min = 1, message = "lastName is required"))]
    pub last_name: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 1, message = "phone is required"))]
    pub phone: String,
    #[validate(length(min = 1, message = "country is required"))]
    pub country: String,
    pub company: Option<String>,
    pub job_title: Option<String>,
}

impl From<CustomerInfoDto> for CustomerInfo {
    fn from(dto: CustomerInfoDto) -> Self {
        CustomerInfo {
            first_name: dto.first_name,
            last_name: dto.last_name,
            email: dto.email.trim().to_lowercase(),
            phone: dto.phone,
            country: dto.country,
            company: dto.company,
            job_title: dto.job_title,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub rail: PaymentRail,

    // Mobile-push correlation ids (assigned once, never mutated)
    pub merchant_request_id: Option<String>,
    pub checkout_request_id: Option<String>,

    // Card correlation ids
    pub stripe_session_id: Option<String>,
    pub stripe_payment_intent_id: Option<String>,

    /// Provider's final payment reference (M-Pesa receipt number or
    /// payment-intent id). Only assigned on success.
    pub provider_reference: Option<String>,

    pub amount: f64,
    pub currency: String,

    pub customer: CustomerInfo,

    pub ticket_id: Option<String>,
    pub ticket_label: Option<String>,
    pub promo_code: Option<String>,
    pub discount_amount: f64,
    pub idempotency_key: Option<String>,
    pub transaction_desc: Option<String>,

    pub status: TransactionStatus,
    pub result_code: Option<String>,
    pub result_desc: Option<String>,

    pub refund_amount: f64,
    pub refunded_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// New pending mobile-push attempt, created right after the provider
    /// accepts the STK request (acceptance, not payment success).
    pub fn new_mpesa_pending(
        merchant_request_id: String,
        checkout_request_id: String,
        amount: f64,
        customer: CustomerInfo,
        ticket_id: Option<String>,
        ticket_label: Option<String>,
        promo_code: Option<String>,
        transaction_desc: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Transaction {
            id: None,
            rail: PaymentRail::Mpesa,
            merchant_request_id: Some(merchant_request_id),
            checkout_request_id: Some(checkout_request_id),
            stripe_session_id: None,
            stripe_payment_intent_id: None,
            provider_reference: None,
            amount,
            currency: "kes".to_string(),
            customer,
            ticket_id,
            ticket_label,
            promo_code,
            discount_amount: 0.0,
            idempotency_key: None,
            transaction_desc,
            status: TransactionStatus::Pending,
            result_code: None,
            result_desc: None,
            refund_amount: 0.0,
            refunded_at: None,
            settled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Free/zero-amount registration: created directly in terminal
    /// `succeeded` state, bypassing the pending lifecycle. No provider call
    /// is involved; the session id is synthesized locally.
    pub fn free_registration(
        customer: CustomerInfo,
        ticket_id: Option<String>,
        ticket_label: Option<String>,
        idempotency_key: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Transaction {
            id: None,
            rail: PaymentRail::Card,
            merchant_request_id: None,
            checkout_request_id: None,
            stripe_session_id: Some(format!("free_{}", Uuid::new_v4().simple())),
            stripe_payment_intent_id: None,
            provider_reference: None,
            amount: 0.0,
            currency: "usd".to_string(),
            customer,
            ticket_id,
            ticket_label,
            promo_code: None,
            discount_amount: 0.0,
            idempotency_key,
            transaction_desc: None,
            status: TransactionStatus::Succeeded,
            result_code: Some("0".to_string()),
            result_desc: Some("Free registration".to_string()),
            refund_amount: 0.0,
            refunded_at: None,
            settled_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    /// The identifier callers use to correlate callbacks and queries with
    /// this record.
    pub fn correlation_id(&self) -> Option<&str> {
        match self.rail {
            PaymentRail::Mpesa => self.checkout_request_id.as_deref(),
            PaymentRail::Card => self.stripe_session_id.as_deref(),
        }
    }
}

/// A single status-changing update. `status`, `result_code` and
/// `result_desc` are written in one atomic update; the optional fields are
/// only set when present.
#[derive(Debug, Clone, Default)]
pub struct Transition {
    pub status: Option<TransactionStatus>,
    pub result_code: Option<String>,
    pub result_desc: Option<String>,
    pub provider_reference: Option<String>,
    pub payment_intent_id: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub discount_amount: Option<f64>,
    pub refund_amount: Option<f64>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Transition {
    pub fn to(status: TransactionStatus) -> Self {
        Transition {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_result(mut self, code: impl Into<String>, desc: impl Into<String>) -> Self {
        self.result_code = Some(code.into());
        self.result_desc = Some(desc.into());
        self
    }

    /// Target status, defaulting to a pending-state refresh when the
    /// transition only updates result fields.
    pub fn target_status(&self) -> TransactionStatus {
        self.status.unwrap_or(TransactionStatus::Pending)
    }
}

/// Aggregate counts for the admin/reporting surface.
#[derive(Debug, Clone, Serialize, Default)]
pub struct TransactionSummary {
    pub total_transactions: u64,
    pub pending: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub refunded: u64,
    pub cancelled: u64,
    pub total_revenue: f64,
    pub unique_customers: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer() -> CustomerInfo {
        CustomerInfo {
            first_name: "Amina".to_string(),
            last_name: "Otieno".to_string(),
            email: "amina@example.com".to_string(),
            phone: "0712345678".to_string(),
            country: "KE".to_string(),
            company: None,
            job_title: None,
        }
    }

    #[test]
    fn free_registration_is_created_already_succeeded() {
        let tx = Transaction::free_registration(customer(), Some("price_free".into()), None, None);
        assert_eq!(tx.status, TransactionStatus::Succeeded);
        assert_eq!(tx.amount, 0.0);
        assert!(tx.settled_at.is_some());
        assert!(tx.stripe_session_id.as_deref().unwrap().starts_with("free_"));
    }

    #[test]
    fn mpesa_attempt_starts_pending_with_correlation_ids() {
        let tx = Transaction::new_mpesa_pending(
            "MR1".into(),
            "CRQ1".into(),
            100.0,
            customer(),
            Some("TICKET".into()),
            Some("Standard".into()),
            None,
            None,
        );
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.correlation_id(), Some("CRQ1"));
        assert!(tx.provider_reference.is_none());
        assert!(tx.settled_at.is_none());
    }

    #[test]
    fn terminal_states_only_allow_refund_from_succeeded() {
        assert_eq!(
            TransactionStatus::Refunded.allowed_sources(),
            &[TransactionStatus::Succeeded]
        );
        assert_eq!(
            TransactionStatus::Succeeded.allowed_sources(),
            &[TransactionStatus::Pending]
        );
        assert!(TransactionStatus::Failed.is_terminal());
        assert!(!TransactionStatus::Pending.is_terminal());
    }
}
