use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::Method;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

mod config;
mod database;
mod errors;
mod handlers;
mod middleware;
mod models;
mod routes;
mod services;
mod state;

use config::{AppConfig, EmailConfig, MpesaConfig, StripeConfig};
use database::connection::{ensure_indexes, get_db_client};
use services::email_service::EmailService;
use services::mpesa_service::MpesaService;
use state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load app config: {}", e);
            std::process::exit(1);
        }
    };

    let db = match get_db_client(&config).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = ensure_indexes(&db).await {
        tracing::warn!("Failed to ensure indexes: {}", e);
    }

    let app_state = initialize_app_state(db, config).await;

    let addr = SocketAddr::new(
        app_state.config.host.parse().unwrap_or([0, 0, 0, 0].into()),
        app_state.config.port,
    );
    let app = build_router(app_state);

    tracing::info!("Server starting on {}", addr);
    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            if let Err(e) = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            {
                tracing::error!("Server error: {}", e);
            }
        }
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    }
}

async fn initialize_app_state(db: mongodb::Database, config: AppConfig) -> AppState {
    let stripe_config = match StripeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load Stripe config: {}", e);
            std::process::exit(1);
        }
    };

    let mut app_state = match AppState::new(db, config, stripe_config) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Failed to initialize services: {}", e);
            std::process::exit(1);
        }
    };

    // Email is optional; the engine falls back to a disabled notifier
    match EmailConfig::from_env() {
        Ok(email_config) => {
            app_state = app_state.with_notifier(Arc::new(EmailService::new(email_config)));
            tracing::info!("Email service initialized");
        }
        Err(e) => {
            tracing::warn!("Email service disabled: {}", e);
        }
    }

    // M-Pesa is optional too: card-only deployments run without it
    match MpesaConfig::from_env() {
        Ok(mpesa_config) => match MpesaService::new(mpesa_config) {
            Ok(mpesa_service) => {
                let mpesa_service = Arc::new(mpesa_service);
                match mpesa_service.get_access_token().await {
                    Ok(_) => tracing::info!("M-Pesa credentials verified"),
                    Err(e) => tracing::warn!("M-Pesa credential check failed: {}", e),
                }
                app_state = app_state.with_mpesa(mpesa_service);
                tracing::info!("M-Pesa service initialized");
            }
            Err(e) => {
                tracing::warn!("M-Pesa service disabled: {}", e);
            }
        },
        Err(e) => {
            tracing::warn!("M-Pesa service disabled: {}", e);
        }
    }

    app_state
}

fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_check))
        .merge(routes::payments::routes())
        .nest("/api/mpesa", routes::mpesa::routes(app_state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

async fn root_handler() -> &'static str {
    "Summit Tickets Payments API"
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    use mongodb::bson::doc;

    let db_status = match state.db.run_command(doc! { "ping": 1 }).await {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    Json(json!({
        "status": "healthy",
        "database": db_status,
        "mpesa": state.mpesa_service.is_some(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
