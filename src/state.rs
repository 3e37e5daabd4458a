// src/state.rs
use std::sync::Arc;

use mongodb::Database;

use crate::config::{AppConfig, StripeConfig};
use crate::database::transaction_store::{MongoTransactionStore, TransactionStore};
use crate::errors::Result;
use crate::middleware::security::RateLimiter;
use crate::middleware::stripe_webhook::StripeWebhookVerifier;
use crate::services::email_service::{DisabledNotifier, Notifier};
use crate::services::mpesa_service::MpesaService;
use crate::services::reconciliation::ReconciliationEngine;
use crate::services::stripe_service::StripeService;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub store: Arc<dyn TransactionStore>,
    pub engine: Arc<ReconciliationEngine>,
    pub stripe_service: Arc<StripeService>,
    pub webhook_verifier: StripeWebhookVerifier,
    pub mpesa_service: Option<Arc<MpesaService>>,
    pub rate_limiter: Arc<RateLimiter>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(db: Database, config: AppConfig, stripe_config: StripeConfig) -> Result<Self> {
        let store: Arc<dyn TransactionStore> = Arc::new(MongoTransactionStore::new(&db));
        let notifier: Arc<dyn Notifier> = Arc::new(DisabledNotifier);
        let engine = Arc::new(ReconciliationEngine::new(store.clone(), notifier));
        let stripe_service = Arc::new(StripeService::new(
            stripe_config.clone(),
            config.frontend_url.clone(),
        )?);

        Ok(AppState {
            db,
            store,
            engine,
            stripe_service,
            webhook_verifier: StripeWebhookVerifier::new(stripe_config.webhook_secret),
            mpesa_service: None,
            rate_limiter: Arc::new(RateLimiter::new()),
            config: Arc::new(config),
        })
    }

    pub fn with_mpesa(mut self, mpesa_service: Arc<MpesaService>) -> Self {
        self.mpesa_service = Some(mpesa_service);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.engine = Arc::new(ReconciliationEngine::new(self.store.clone(), notifier));
        self
    }
}
