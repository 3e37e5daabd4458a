// models/stripe_event.rs
use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::errors::{AppError, Result};
use crate::models::transaction::CustomerInfo;

/// Stripe webhook event envelope. The payload under `data.object` is kept
/// raw and deserialized per event type.
#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub created: i64,
    #[serde(default)]
    pub livemode: bool,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

impl StripeEvent {
    pub fn object<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.object.clone())
            .map_err(|e| AppError::invalid_data(format!("malformed {} payload: {}", self.event_type, e)))
    }
}

/// Checkout session object, shared between the session-completed webhook
/// and the session retrieve API.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub customer_details: Option<SessionCustomerDetails>,
    #[serde(default)]
    pub total_details: Option<SessionTotalDetails>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionCustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionTotalDetails {
    #[serde(default)]
    pub amount_discount: Option<i64>,
}

/// Shape of the `customerInfo` JSON blob the checkout frontend stores in
/// session metadata.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataCustomerInfo {
    first_name: String,
    last_name: String,
    email: String,
    #[serde(default)]
    phone: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    company: Option<String>,
    #[serde(default)]
    job_title: Option<String>,
}

impl CheckoutSessionObject {
    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some("paid")
    }

    pub fn metadata_value(&self, key: &str) -> Option<String> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .filter(|v| !v.is_empty())
            .cloned()
    }

    /// Customer snapshot from the `customerInfo` metadata blob. When the
    /// blob is missing or unparsable, falls back to the individual metadata
    /// fields plus the session's `customer_details` email.
    pub fn customer_snapshot(&self) -> CustomerInfo {
        if let Some(raw) = self.metadata_value("customerInfo") {
            match serde_json::from_str::<MetadataCustomerInfo>(&raw) {
                Ok(info) => {
                    return CustomerInfo {
                        first_name: info.first_name,
                        last_name: info.last_name,
                        email: info.email,
                        phone: info.phone,
                        country: info.country,
                        company: info.company,
                        job_title: info.job_title,
                    };
                }
                Err(e) => {
                    tracing::error!("Error parsing customerInfo from metadata: {}", e);
                }
            }
        }

        CustomerInfo {
            first_name: self.metadata_value("firstName").unwrap_or_default(),
            last_name: self.metadata_value("lastName").unwrap_or_default(),
            email: self
                .customer_details
                .as_ref()
                .and_then(|d| d.email.clone())
                .unwrap_or_default(),
            phone: self.metadata_value("phone").unwrap_or_default(),
            country: self.metadata_value("country").unwrap_or_default(),
            company: self.metadata_value("company"),
            job_title: self.metadata_value("jobTitle"),
        }
    }

    pub fn discount_amount(&self) -> f64 {
        self.total_details
            .as_ref()
            .and_then(|d| d.amount_discount)
            .unwrap_or(0) as f64
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntentObject {
    pub id: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub last_payment_error: Option<PaymentIntentError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntentError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChargeObject {
    pub id: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub amount_refunded: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn customer_snapshot_prefers_metadata_blob() {
        let session: CheckoutSessionObject = serde_json::from_value(json!({
            "id": "cs_test_1",
            "payment_status": "paid",
            "customer_details": { "email": "fallback@example.com" },
            "metadata": {
                "customerInfo": "{\"firstName\":\"Amina\",\"lastName\":\"Otieno\",\"email\":\"amina@example.com\",\"phone\":\"254712345678\",\"country\":\"KE\"}"
            }
        }))
        .unwrap();

        let customer = session.customer_snapshot();
        assert_eq!(customer.first_name, "Amina");
        assert_eq!(customer.email, "amina@example.com");
    }

    #[test]
    fn customer_snapshot_falls_back_on_parse_failure() {
        let session: CheckoutSessionObject = serde_json::from_value(json!({
            "id": "cs_test_2",
            "payment_status": "paid",
            "customer_details": { "email": "fallback@example.com" },
            "metadata": {
                "customerInfo": "{not valid json",
                "firstName": "Joy",
                "country": "KE"
            }
        }))
        .unwrap();

        let customer = session.customer_snapshot();
        assert_eq!(customer.first_name, "Joy");
        assert_eq!(customer.email, "fallback@example.com");
        assert_eq!(customer.country, "KE");
    }

    #[test]
    fn event_object_deserializes_per_type() {
        let event: StripeEvent = serde_json::from_value(json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "created": 1704067200,
            "livemode": false,
            "data": { "object": { "id": "pi_123", "amount": 5000, "currency": "usd" } }
        }))
        .unwrap();

        let intent: PaymentIntentObject = event.object().unwrap();
        assert_eq!(intent.id, "pi_123");
        assert_eq!(intent.amount, Some(5000));
    }
}
