// services/reconciliation.rs
//
// The state machine driving a transaction from `pending` to a terminal
// state. Three independent triggers feed it: the initiation response, the
// provider's asynchronous callback/webhook, and the on-demand status query.
// All status writes go through TransactionStore::apply_transition, whose
// atomic guarded update is the sole mechanism preventing lost updates when
// triggers race on the same record.
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::database::transaction_store::{TransactionKey, TransactionStore};
use crate::errors::Result;
use crate::models::stk_callback::StkCallback;
use crate::models::stripe_event::{ChargeObject, CheckoutSessionObject, PaymentIntentObject};
use crate::models::transaction::{
    PaymentRail, Transaction, TransactionStatus, Transition,
};
use crate::services::email_service::{Notifier, PaymentConfirmation};
use crate::services::provider::{ProviderClient, RESULT_OK, RESULT_STILL_PENDING};

pub struct ReconciliationEngine {
    store: Arc<dyn TransactionStore>,
    notifier: Arc<dyn Notifier>,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn TransactionStore>, notifier: Arc<dyn Notifier>) -> Self {
        ReconciliationEngine { store, notifier }
    }

    /// STK callback trigger. Result code 0 settles the record and fires the
    /// confirmation email; the user-cancelled sentinel leaves it pending
    /// (the prompt may still be completed); any other code fails it. An
    /// unknown correlation id is logged and discarded — the gateway still
    /// acknowledges receipt.
    pub async fn apply_stk_callback(&self, callback: &StkCallback) -> Result<Option<Transaction>> {
        let key = TransactionKey::Correlation(&callback.checkout_request_id);
        if self.store.find(key).await?.is_none() {
            warn!(
                "Transaction not found for checkout request: {}",
                callback.checkout_request_id
            );
            return Ok(None);
        }

        let code = callback.result_code.to_string();

        let transition = if code == RESULT_OK {
            let metadata = callback.metadata();
            let mut transition = Transition::to(TransactionStatus::Succeeded)
                .with_result(code, callback.result_desc.clone());
            transition.provider_reference = metadata.receipt_number.clone();
            transition.amount = metadata.amount;
            transition.settled_at = Some(metadata.transaction_date.unwrap_or_else(Utc::now));
            transition
        } else if code == RESULT_STILL_PENDING {
            // Prompt dismissed but not resolved; record the provider's
            // words and stay pending.
            let mut transition =
                Transition::default().with_result(code, callback.result_desc.clone());
            transition.status = Some(TransactionStatus::Pending);
            transition
        } else {
            info!("Payment failed: {}", callback.result_desc);
            Transition::to(TransactionStatus::Failed)
                .with_result(code, callback.result_desc.clone())
        };

        let outcome = self.store.apply_transition(key, transition).await?;
        let updated = outcome.transaction;

        // `applied` decides the one-shot side effect: of two racing success
        // callbacks only the one whose write landed sends the email
        if outcome.applied && updated.status == TransactionStatus::Succeeded {
            info!(
                "Payment successful: {}",
                updated.provider_reference.as_deref().unwrap_or("-")
            );
            self.notify_success(&updated).await;
        }

        Ok(Some(updated))
    }

    /// On-demand query trigger. Only a pending record is reconciled against
    /// the provider; when the provider cannot be reached (or answers with
    /// anything but a verdict), the last-known local state is surfaced
    /// unchanged.
    pub async fn reconcile_on_query(
        &self,
        provider: &dyn ProviderClient,
        correlation_id: &str,
    ) -> Result<Transaction> {
        let key = TransactionKey::Correlation(correlation_id);
        let tx = self
            .store
            .find(key)
            .await?
            .ok_or(crate::errors::AppError::NotFound)?;

        if tx.status != TransactionStatus::Pending {
            return Ok(tx);
        }

        let status = match provider.query_status(correlation_id).await {
            Ok(status) => status,
            Err(e) => {
                warn!("Error querying provider status for {}: {}", correlation_id, e);
                return Ok(tx);
            }
        };

        if status.is_ok() {
            let mut transition = Transition::to(TransactionStatus::Succeeded)
                .with_result(status.result_code, status.result_desc);
            transition.settled_at = Some(Utc::now());
            Ok(self.store.apply_transition(key, transition).await?.transaction)
        } else if status.is_still_pending() {
            Ok(tx)
        } else {
            let transition = Transition::to(TransactionStatus::Failed)
                .with_result(status.result_code, status.result_desc);
            Ok(self.store.apply_transition(key, transition).await?.transaction)
        }
    }

    /// Card session-completed trigger: an upsert keyed by the session id.
    /// The webhook can race ahead of (or entirely replace) any synchronous
    /// creation path, so a missing record is created in the status the
    /// event's payment status dictates; an existing one gets its
    /// amount/currency/status/reference refreshed idempotently.
    pub async fn apply_session_completed(
        &self,
        session: &CheckoutSessionObject,
        ticket_id: Option<String>,
    ) -> Result<Transaction> {
        let paid = session.is_paid();
        let now = Utc::now();

        let candidate = Transaction {
            id: None,
            rail: PaymentRail::Card,
            merchant_request_id: None,
            checkout_request_id: None,
            stripe_session_id: Some(session.id.clone()),
            stripe_payment_intent_id: session.payment_intent.clone(),
            provider_reference: if paid { session.payment_intent.clone() } else { None },
            amount: session.amount_total.unwrap_or(0) as f64,
            currency: session.currency.clone().unwrap_or_else(|| "usd".to_string()),
            customer: session.customer_snapshot(),
            ticket_id,
            ticket_label: session.metadata_value("ticketLabel"),
            promo_code: session.metadata_value("promoCode"),
            discount_amount: session.discount_amount(),
            idempotency_key: session.metadata_value("idempotencyKey"),
            transaction_desc: None,
            status: if paid { TransactionStatus::Succeeded } else { TransactionStatus::Pending },
            result_code: paid.then(|| RESULT_OK.to_string()),
            result_desc: session.payment_status.clone(),
            refund_amount: 0.0,
            refunded_at: None,
            settled_at: paid.then_some(now),
            created_at: now,
            updated_at: now,
        };

        match self.store.create(candidate.clone()).await {
            Ok(tx) => {
                info!("Payment record created from session event: {}", session.id);
                Ok(tx)
            }
            Err(crate::errors::AppError::DuplicateKey) => {
                let mut transition = Transition {
                    status: Some(candidate.status),
                    amount: Some(candidate.amount),
                    currency: Some(candidate.currency.clone()),
                    discount_amount: Some(candidate.discount_amount),
                    payment_intent_id: session.payment_intent.clone(),
                    provider_reference: candidate.provider_reference.clone(),
                    settled_at: candidate.settled_at,
                    ..Default::default()
                };
                transition.result_code = candidate.result_code.clone();
                transition.result_desc = candidate.result_desc.clone();

                let outcome = self
                    .store
                    .apply_transition(TransactionKey::Correlation(&session.id), transition)
                    .await?;
                Ok(outcome.transaction)
            }
            Err(e) => Err(e),
        }
    }

    /// Payment-confirmed event keyed by payment-intent id. This event alone
    /// cannot reconstruct customer or ticket context, so a miss is logged
    /// and discarded instead of creating a record.
    pub async fn apply_payment_intent_succeeded(
        &self,
        intent: &PaymentIntentObject,
    ) -> Result<Option<Transaction>> {
        let key = TransactionKey::PaymentIntent(&intent.id);
        if self.store.find(key).await?.is_none() {
            warn!("Payment not found for payment intent: {}", intent.id);
            return Ok(None);
        }

        let mut transition = Transition::to(TransactionStatus::Succeeded)
            .with_result(RESULT_OK, "Payment intent succeeded");
        transition.amount = intent.amount.map(|a| a as f64);
        transition.currency = intent.currency.clone();
        transition.provider_reference = Some(intent.id.clone());
        transition.settled_at = Some(Utc::now());

        let outcome = self.store.apply_transition(key, transition).await?;
        info!("Payment status updated to succeeded: {}", intent.id);
        Ok(Some(outcome.transaction))
    }

    pub async fn apply_payment_intent_failed(
        &self,
        intent: &PaymentIntentObject,
    ) -> Result<Option<Transaction>> {
        let key = TransactionKey::PaymentIntent(&intent.id);
        if self.store.find(key).await?.is_none() {
            warn!("Payment not found for payment intent: {}", intent.id);
            return Ok(None);
        }

        let (code, message) = intent
            .last_payment_error
            .as_ref()
            .map(|e| {
                (
                    e.code.clone().unwrap_or_else(|| "payment_failed".to_string()),
                    e.message.clone().unwrap_or_else(|| "Payment failed".to_string()),
                )
            })
            .unwrap_or_else(|| ("payment_failed".to_string(), "Payment failed".to_string()));

        let transition = Transition::to(TransactionStatus::Failed).with_result(code, message);
        let outcome = self.store.apply_transition(key, transition).await?;
        Ok(Some(outcome.transaction))
    }

    /// Refund event: the only exit from `succeeded`. Missing or
    /// non-succeeded records are left alone.
    pub async fn apply_charge_refunded(
        &self,
        charge: &ChargeObject,
    ) -> Result<Option<Transaction>> {
        let Some(intent_id) = charge.payment_intent.as_deref() else {
            warn!("Refunded charge {} carries no payment intent", charge.id);
            return Ok(None);
        };

        let key = TransactionKey::PaymentIntent(intent_id);
        if self.store.find(key).await?.is_none() {
            warn!("Payment not found for charge: {}", charge.id);
            return Ok(None);
        }

        let mut transition = Transition::to(TransactionStatus::Refunded)
            .with_result(RESULT_OK, "Charge refunded");
        transition.refund_amount = Some(charge.amount_refunded.unwrap_or(0) as f64);
        transition.refunded_at = Some(Utc::now());

        let outcome = self.store.apply_transition(key, transition).await?;
        Ok(Some(outcome.transaction))
    }

    /// Best-effort: a failed send is logged and swallowed, never rolled
    /// back into the transaction state.
    async fn notify_success(&self, tx: &Transaction) {
        let confirmation = PaymentConfirmation {
            email: tx.customer.email.clone(),
            name: tx.customer.full_name(),
            ticket_label: tx.ticket_label.clone(),
            amount: tx.amount,
            currency: tx.currency.clone(),
            reference: tx.provider_reference.clone(),
            payment_method: match tx.rail {
                PaymentRail::Mpesa => "M-Pesa",
                PaymentRail::Card => "Card",
            },
        };

        if let Err(e) = self.notifier.send_confirmation(&confirmation).await {
            error!("Failed to send confirmation email: {}", e);
        }
    }
}
