// handlers/mpesa_handlers.rs
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};
use validator::Validate;

use crate::database::transaction_store::TransactionKey;
use crate::errors::{AppError, Result};
use crate::models::stk_callback::CallbackData;
use crate::models::transaction::{CustomerInfoDto, Transaction};
use crate::services::mpesa_service::MpesaService;
use crate::services::provider::{InitiateRequest, ProviderClient};
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentRequest {
    #[validate(length(min = 9, message = "phoneNumber is required"))]
    pub phone_number: String,
    #[validate(range(min = 1.0, message = "Amount must be at least 1 KES"))]
    pub amount: f64,
    pub ticket_id: Option<String>,
    pub ticket_label: Option<String>,
    pub promo_code: Option<String>,
    #[validate(nested)]
    pub customer_info: CustomerInfoDto,
}

#[derive(Debug, Deserialize)]
pub struct StaleQuery {
    pub minutes: Option<i64>,
}

fn require_mpesa(state: &AppState) -> Result<Arc<MpesaService>> {
    state
        .mpesa_service
        .clone()
        .ok_or_else(|| AppError::ServiceUnavailable("M-Pesa service is not available".to_string()))
}

/// Correlation ids are provider-issued tokens; anything outside this
/// alphabet is rejected before a lookup.
fn validate_correlation_id(id: &str) -> Result<()> {
    if id.is_empty()
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(AppError::invalid_data("Invalid checkout request ID format"));
    }
    Ok(())
}

pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(payload): Json<InitiatePaymentRequest>,
) -> Result<Json<Value>> {
    payload.validate()?;

    let mpesa = require_mpesa(&state)?;
    info!("Initiating M-Pesa payment for: {}", payload.customer_info.email);

    let description = format!(
        "Payment for {}",
        payload.ticket_label.as_deref().unwrap_or("Event Ticket")
    );
    let request = InitiateRequest {
        payer: payload.phone_number.clone(),
        amount: payload.amount,
        reference: payload.ticket_id.clone().unwrap_or_else(|| "TICKET".to_string()),
        description: description.clone(),
        customer: payload.customer_info.clone().into(),
        promo_code: payload.promo_code.clone(),
        idempotency_key: None,
        ticket_label: payload.ticket_label.clone(),
    };

    let ack = mpesa.initiate(&request).await?;

    let tx = Transaction::new_mpesa_pending(
        ack.merchant_request_id.clone().unwrap_or_default(),
        ack.correlation_id.clone(),
        payload.amount,
        request.customer,
        payload.ticket_id,
        payload.ticket_label,
        payload.promo_code,
        Some(description),
    );
    state.store.create(tx).await?;
    info!("M-Pesa transaction saved: {}", ack.correlation_id);

    Ok(Json(json!({
        "success": true,
        "checkoutRequestId": ack.correlation_id,
        "merchantRequestId": ack.merchant_request_id,
        "message": ack.human_message,
    })))
}

/// Safaricom retries unacknowledged callbacks, so the ack goes out
/// immediately and reconciliation runs in a spawned task. Processing
/// failures are logged, never surfaced to the caller.
pub async fn mpesa_callback(
    State(state): State<AppState>,
    Json(payload): Json<CallbackData>,
) -> Json<Value> {
    let callback = payload.body.stk_callback;
    info!(
        "M-Pesa callback received: {} (code {})",
        callback.checkout_request_id, callback.result_code
    );

    let engine = state.engine.clone();
    tokio::spawn(async move {
        if let Err(e) = engine.apply_stk_callback(&callback).await {
            error!("M-Pesa callback processing error: {}", e);
        }
    });

    Json(json!({ "ResultCode": 0, "ResultDesc": "Success" }))
}

/// Local state, reconciled against the provider when still pending. Falls
/// back to the stored record when M-Pesa is unreachable or unconfigured.
pub async fn check_payment_status(
    State(state): State<AppState>,
    Path(checkout_request_id): Path<String>,
) -> Result<Json<Value>> {
    validate_correlation_id(&checkout_request_id)?;

    let tx = match &state.mpesa_service {
        Some(mpesa) => {
            state
                .engine
                .reconcile_on_query(mpesa.as_ref(), &checkout_request_id)
                .await?
        }
        None => state
            .store
            .find(TransactionKey::Correlation(&checkout_request_id))
            .await?
            .ok_or(AppError::NotFound)?,
    };

    Ok(Json(json!({
        "success": true,
        "status": tx.status.as_str(),
        "mpesaReceiptNumber": tx.provider_reference,
        "resultDesc": tx.result_desc,
        "amount": tx.amount,
        "transactionDate": tx.settled_at,
    })))
}

/// Raw provider status passthrough, no local state involved.
pub async fn query_transaction(
    State(state): State<AppState>,
    Path(checkout_request_id): Path<String>,
) -> Result<Json<Value>> {
    validate_correlation_id(&checkout_request_id)?;
    let mpesa = require_mpesa(&state)?;

    let response = mpesa.query_stk_status(&checkout_request_id).await?;
    Ok(Json(json!({
        "success": true,
        "resultCode": response.result_code,
        "resultDesc": response.result_desc,
        "merchantRequestId": response.merchant_request_id,
        "checkoutRequestId": response.checkout_request_id,
    })))
}

pub async fn get_transaction_summary(State(state): State<AppState>) -> Result<Json<Value>> {
    let summary = state.store.summary().await?;
    Ok(Json(json!({ "success": true, "data": summary })))
}

pub async fn get_customer_transactions(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<Json<Value>> {
    let transactions = state.store.find_by_email(&email).await?;
    Ok(Json(json!({
        "success": true,
        "count": transactions.len(),
        "data": transactions,
    })))
}

/// Pending records the callback never resolved, oldest first.
pub async fn get_stale_transactions(
    State(state): State<AppState>,
    Query(query): Query<StaleQuery>,
) -> Result<Json<Value>> {
    let minutes = query.minutes.unwrap_or(30).max(1);
    let transactions = state.store.find_stale_pending(minutes).await?;
    Ok(Json(json!({
        "success": true,
        "count": transactions.len(),
        "cutoffMinutes": minutes,
        "data": transactions,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_ids_are_format_checked() {
        assert!(validate_correlation_id("ws_CO_191220191020363925").is_ok());
        assert!(validate_correlation_id("abc-DEF_123").is_ok());
        assert!(validate_correlation_id("").is_err());
        assert!(validate_correlation_id("has spaces").is_err());
        assert!(validate_correlation_id("$or:{}").is_err());
    }

    #[test]
    fn initiate_request_is_validated() {
        let payload: InitiatePaymentRequest = serde_json::from_value(serde_json::json!({
            "phoneNumber": "0712345678",
            "amount": 0.5,
            "customerInfo": {
                "firstName": "Amina",
                "lastName": "Otieno",
                "email": "not-an-email",
                "phone": "0712345678",
                "country": "KE"
            }
        }))
        .unwrap();

        let errors = payload.validate().unwrap_err().to_string();
        assert!(errors.contains("Amount must be at least 1 KES"));
        assert!(errors.contains("Invalid email format"));
    }
}
