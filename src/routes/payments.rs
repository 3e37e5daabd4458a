// routes/payments.rs
//
// Card-rail routes. The checkout/session/webhook endpoints are mounted at
// the root and the read endpoints under /api, matching the paths the
// checkout frontend calls.
use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{payment_handlers, webhook_handlers};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/create-checkout-session", post(payment_handlers::create_checkout_session))
        .route("/session-status", get(payment_handlers::get_session_status))
        .route("/webhook", post(webhook_handlers::handle_webhook))
        .route("/api/free-registration", post(payment_handlers::handle_free_registration))
        .route("/api/payments", get(payment_handlers::get_all_payments))
        .route("/api/payment/:session_id", get(payment_handlers::get_payment_by_session_id))
        .route("/api/payment-stats", get(payment_handlers::get_payment_stats))
        .route("/api/payments/customer/:email", get(payment_handlers::get_payments_by_email))
}
