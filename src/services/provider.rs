// services/provider.rs
use async_trait::async_trait;

use crate::errors::Result;
use crate::models::transaction::CustomerInfo;

/// Result code meaning the payment went through.
pub const RESULT_OK: &str = "0";

/// Sentinel meaning "not yet resolved" (the M-Pesa prompt was dismissed or
/// is still open; the card session is still open). Distinct from both
/// success and definitive failure: it must never flip a record to failed.
pub const RESULT_STILL_PENDING: &str = "1032";

#[derive(Debug, Clone)]
pub struct InitiateRequest {
    /// Payer address on the provider's rail: phone number (mobile push) or
    /// email (card checkout).
    pub payer: String,
    pub amount: f64,
    pub reference: String,
    pub description: String,
    pub customer: CustomerInfo,
    pub promo_code: Option<String>,
    pub idempotency_key: Option<String>,
    pub ticket_label: Option<String>,
}

/// The provider accepted the request. Acceptance only — payment success is
/// reported later through a callback or query.
#[derive(Debug, Clone)]
pub struct ProviderAck {
    pub correlation_id: String,
    pub merchant_request_id: Option<String>,
    pub client_secret: Option<String>,
    pub human_message: String,
}

#[derive(Debug, Clone)]
pub struct ProviderStatus {
    pub result_code: String,
    pub result_desc: String,
}

impl ProviderStatus {
    pub fn is_ok(&self) -> bool {
        self.result_code == RESULT_OK
    }

    pub fn is_still_pending(&self) -> bool {
        self.result_code == RESULT_STILL_PENDING
    }
}

/// Outbound calls to a payment provider. `ProviderUnreachable` from
/// `query_status` means "unknown, retry later" — never a failure verdict.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn initiate(&self, request: &InitiateRequest) -> Result<ProviderAck>;
    async fn query_status(&self, correlation_id: &str) -> Result<ProviderStatus>;
}
