// handlers/payment_handlers.rs
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use validator::Validate;

use crate::database::transaction_store::{TransactionFilter, TransactionKey};
use crate::errors::{AppError, Result};
use crate::models::transaction::{CustomerInfoDto, Transaction, TransactionStatus};
use crate::services::provider::{InitiateRequest, ProviderClient};
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutSessionRequest {
    #[validate(length(min = 1, message = "ticketId is required"))]
    pub ticket_id: String,
    pub ticket_label: Option<String>,
    pub promo_code: Option<String>,
    pub idempotency_key: Option<String>,
    #[validate(nested)]
    pub customer_info: CustomerInfoDto,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FreeRegistrationRequest {
    #[validate(length(min = 1, message = "ticketId is required"))]
    pub ticket_id: String,
    pub ticket_label: Option<String>,
    pub idempotency_key: Option<String>,
    #[validate(nested)]
    pub customer_info: CustomerInfoDto,
}

#[derive(Debug, Deserialize)]
pub struct SessionStatusQuery {
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentsQuery {
    pub email: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub page: Option<i64>,
}

fn parse_status(value: &str) -> Result<TransactionStatus> {
    match value {
        "pending" => Ok(TransactionStatus::Pending),
        "succeeded" => Ok(TransactionStatus::Succeeded),
        "failed" => Ok(TransactionStatus::Failed),
        "refunded" => Ok(TransactionStatus::Refunded),
        "cancelled" => Ok(TransactionStatus::Cancelled),
        other => Err(AppError::invalid_data(format!("Unknown status: {}", other))),
    }
}

/// No local record is created here; the session-completed webhook is the
/// source of truth for the card rail.
pub async fn create_checkout_session(
    State(state): State<AppState>,
    Json(payload): Json<CreateCheckoutSessionRequest>,
) -> Result<Json<Value>> {
    payload.validate()?;
    info!(
        "Creating checkout session for {} ({})",
        payload.customer_info.email, payload.ticket_id
    );

    let request = InitiateRequest {
        payer: payload.customer_info.email.clone(),
        amount: 0.0,
        reference: payload.ticket_id,
        description: String::new(),
        customer: payload.customer_info.into(),
        promo_code: payload.promo_code,
        idempotency_key: payload.idempotency_key,
        ticket_label: payload.ticket_label,
    };

    let ack = state.stripe_service.initiate(&request).await?;

    Ok(Json(json!({
        "success": true,
        "clientSecret": ack.client_secret,
        "sessionId": ack.correlation_id,
    })))
}

pub async fn get_session_status(
    State(state): State<AppState>,
    Query(query): Query<SessionStatusQuery>,
) -> Result<Json<Value>> {
    let session_id = query
        .session_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::invalid_data("session_id is required"))?;

    let session = state.stripe_service.retrieve_session(&session_id).await?;

    Ok(Json(json!({
        "success": true,
        "status": session.status,
        "customer_email": session.customer_details.as_ref().and_then(|d| d.email.clone()),
        "payment_status": session.payment_status,
    })))
}

/// Zero-amount tickets skip the provider entirely; the record is created
/// directly in terminal `succeeded` state.
pub async fn handle_free_registration(
    State(state): State<AppState>,
    Json(payload): Json<FreeRegistrationRequest>,
) -> Result<Json<Value>> {
    payload.validate()?;
    info!("Processing free registration for {}", payload.customer_info.email);

    let tx = Transaction::free_registration(
        payload.customer_info.into(),
        Some(payload.ticket_id),
        payload.ticket_label,
        payload.idempotency_key,
    );
    let created = state.store.create(tx).await?;
    info!(
        "Free registration record created: {}",
        created.stripe_session_id.as_deref().unwrap_or("-")
    );

    Ok(Json(json!({
        "success": true,
        "message": "Registration completed successfully",
        "registrationId": created.id,
        "sessionId": created.stripe_session_id,
    })))
}

pub async fn get_all_payments(
    State(state): State<AppState>,
    Query(query): Query<PaymentsQuery>,
) -> Result<Json<Value>> {
    let status = query.status.as_deref().map(parse_status).transpose()?;
    let limit = query.limit.unwrap_or(50).max(1);
    let page = query.page.unwrap_or(1).max(1);

    let filter = TransactionFilter {
        email: query.email,
        status,
        limit: Some(limit),
        page: Some(page),
    };
    let (payments, total) = state.store.list(filter).await?;

    Ok(Json(json!({
        "success": true,
        "payments": payments,
        "pagination": {
            "total": total,
            "page": page,
            "limit": limit,
            "pages": (total + limit as u64 - 1) / limit as u64,
        },
    })))
}

pub async fn get_payment_by_session_id(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>> {
    let payment = state
        .store
        .find(TransactionKey::Correlation(&session_id))
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(Json(json!({ "success": true, "payment": payment })))
}

pub async fn get_payment_stats(State(state): State<AppState>) -> Result<Json<Value>> {
    let summary = state.store.summary().await?;

    Ok(Json(json!({
        "success": true,
        "stats": {
            "totalPayments": summary.total_transactions,
            "totalRevenue": summary.total_revenue,
            "uniqueCustomers": summary.unique_customers,
            "byStatus": {
                "pending": summary.pending,
                "succeeded": summary.succeeded,
                "failed": summary.failed,
                "refunded": summary.refunded,
                "cancelled": summary.cancelled,
            },
        },
    })))
}

pub async fn get_payments_by_email(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<Json<Value>> {
    let payments = state.store.find_by_email(&email).await?;

    Ok(Json(json!({
        "success": true,
        "total": payments.len(),
        "payments": payments,
    })))
}
