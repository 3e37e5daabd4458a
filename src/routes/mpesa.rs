// routes/mpesa.rs
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;

use crate::handlers::mpesa_handlers;
use crate::middleware::security;
use crate::state::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/health", get(mpesa_health))
        .route(
            "/initiate",
            post(mpesa_handlers::initiate_payment)
                .route_layer(from_fn_with_state(state.clone(), security::rate_limit)),
        )
        .route(
            "/callback",
            post(mpesa_handlers::mpesa_callback)
                .route_layer(from_fn_with_state(state, security::verify_callback_ip)),
        )
        .route("/status/:checkout_request_id", get(mpesa_handlers::check_payment_status))
        .route("/query/:checkout_request_id", get(mpesa_handlers::query_transaction))
        .route("/summary", get(mpesa_handlers::get_transaction_summary))
        .route("/customer/:email", get(mpesa_handlers::get_customer_transactions))
        .route("/stale", get(mpesa_handlers::get_stale_transactions))
}

async fn mpesa_health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "mpesa",
        "timestamp": Utc::now().to_rfc3339(),
        "features": ["stk-push", "callback", "status-check", "query", "summary"]
    }))
}
