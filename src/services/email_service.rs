// services/email_service.rs
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{info, warn};

use crate::config::EmailConfig;
use crate::errors::{AppError, Result};

/// Confirmation payload for a terminal `succeeded` transaction.
#[derive(Debug, Clone)]
pub struct PaymentConfirmation {
    pub email: String,
    pub name: String,
    pub ticket_label: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub reference: Option<String>,
    pub payment_method: &'static str,
}

/// Best-effort confirmation sender. Failures never affect transaction
/// state; callers log and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_confirmation(&self, confirmation: &PaymentConfirmation) -> Result<()>;
}

#[derive(Clone)]
pub struct EmailService {
    config: EmailConfig,
    client: Client,
}

impl EmailService {
    pub fn new(config: EmailConfig) -> Self {
        EmailService {
            config,
            client: Client::new(),
        }
    }

    fn render_html(confirmation: &PaymentConfirmation) -> String {
        let ticket = confirmation.ticket_label.as_deref().unwrap_or("Event Ticket");
        let reference = confirmation.reference.as_deref().unwrap_or("-");
        format!(
            r#"<html><body style="font-family: Arial, sans-serif; color: #333;">
  <h1>Registration Confirmed</h1>
  <p>Dear {name},</p>
  <p>Thank you for registering. Your payment has been confirmed.</p>
  <table>
    <tr><td><strong>Ticket:</strong></td><td>{ticket}</td></tr>
    <tr><td><strong>Amount:</strong></td><td>{amount} {currency}</td></tr>
    <tr><td><strong>Reference:</strong></td><td>{reference}</td></tr>
    <tr><td><strong>Payment method:</strong></td><td>{method}</td></tr>
  </table>
  <p>See you at the event!</p>
</body></html>"#,
            name = confirmation.name,
            ticket = ticket,
            amount = confirmation.amount,
            currency = confirmation.currency.to_uppercase(),
            reference = reference,
            method = confirmation.payment_method,
        )
    }
}

#[async_trait]
impl Notifier for EmailService {
    async fn send_confirmation(&self, confirmation: &PaymentConfirmation) -> Result<()> {
        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "from": self.config.from_address,
                "to": confirmation.email,
                "subject": "Registration Confirmed",
                "html": Self::render_html(confirmation),
            }))
            .send()
            .await
            .map_err(|e| AppError::NotificationError(format!("Email API error: {}", e)))?;

        if response.status().is_success() {
            info!("Confirmation email sent to {}", confirmation.email);
            Ok(())
        } else {
            Err(AppError::NotificationError(format!(
                "Email sending failed with status: {}",
                response.status()
            )))
        }
    }
}

/// Stand-in when email is not configured; keeps the engine wiring uniform.
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn send_confirmation(&self, confirmation: &PaymentConfirmation) -> Result<()> {
        warn!(
            "Email service disabled; skipping confirmation for {}",
            confirmation.email
        );
        Ok(())
    }
}
