// services/stripe_service.rs
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, info};

use crate::config::StripeConfig;
use crate::errors::{AppError, Result};
use crate::models::stripe_event::CheckoutSessionObject;
use crate::services::provider::{
    InitiateRequest, ProviderAck, ProviderClient, ProviderStatus, RESULT_OK, RESULT_STILL_PENDING,
};

#[derive(Debug, Deserialize)]
struct PromotionCodeList {
    data: Vec<PromotionCode>,
}

#[derive(Debug, Deserialize)]
struct PromotionCode {
    id: String,
    #[serde(default)]
    coupon: Option<Coupon>,
}

#[derive(Debug, Deserialize)]
struct Coupon {
    #[serde(default)]
    percent_off: Option<f64>,
    #[serde(default)]
    amount_off: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct LineItemList {
    data: Vec<LineItem>,
}

#[derive(Debug, Deserialize)]
struct LineItem {
    #[serde(default)]
    price: Option<LineItemPrice>,
}

#[derive(Debug, Deserialize)]
struct LineItemPrice {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Clone)]
pub struct StripeService {
    config: StripeConfig,
    frontend_url: String,
    client: Client,
}

impl StripeService {
    pub fn new(config: StripeConfig, frontend_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(StripeService {
            config,
            frontend_url,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url, path)
    }

    async fn check(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        error!("{} failed: {} - {}", action, status, body);

        let message = serde_json::from_str::<StripeErrorBody>(&body)
            .ok()
            .and_then(|e| e.error.message)
            .unwrap_or_else(|| format!("{} failed: {}", action, status));

        if status.is_client_error() {
            Err(AppError::rejected(message))
        } else {
            Err(AppError::unreachable(message))
        }
    }

    /// Look up an active promotion code; `Ok(None)` when the code does not
    /// exist or is inactive.
    pub async fn find_promotion_code(&self, code: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(self.url("/v1/promotion_codes"))
            .bearer_auth(&self.config.secret_key)
            .query(&[("code", code), ("active", "true")])
            .send()
            .await?;

        let response = Self::check(response, "Promotion code lookup").await?;
        let list: PromotionCodeList = response.json().await?;

        match list.data.into_iter().next() {
            Some(promotion) => {
                match promotion.coupon {
                    Some(Coupon { percent_off: Some(percent), .. }) => {
                        info!("Promo code applied: {} ({}% off)", code, percent);
                    }
                    Some(Coupon { amount_off: Some(cents), .. }) => {
                        info!("Promo code applied: {} ({} minor units off)", code, cents);
                    }
                    _ => info!("Promo code applied: {}", code),
                }
                Ok(Some(promotion.id))
            }
            None => Ok(None),
        }
    }

    /// Create an embedded checkout session for a single ticket line item.
    /// The customer snapshot travels in session metadata so the webhook can
    /// rebuild the record without a synchronous creation path.
    pub async fn create_checkout_session(
        &self,
        request: &InitiateRequest,
        promotion_code_id: Option<&str>,
    ) -> Result<CheckoutSessionObject> {
        let customer_info = serde_json::to_string(&serde_json::json!({
            "firstName": request.customer.first_name,
            "lastName": request.customer.last_name,
            "email": request.customer.email,
            "phone": request.customer.phone,
            "country": request.customer.country,
            "company": request.customer.company,
            "jobTitle": request.customer.job_title,
        }))?;

        let return_url = format!("{}/return?session_id={{CHECKOUT_SESSION_ID}}", self.frontend_url);

        let mut form: Vec<(&str, String)> = vec![
            ("ui_mode", "embedded".to_string()),
            ("mode", "payment".to_string()),
            ("line_items[0][price]", request.reference.clone()),
            ("line_items[0][quantity]", "1".to_string()),
            ("line_items[0][adjustable_quantity][enabled]", "true".to_string()),
            ("line_items[0][adjustable_quantity][minimum]", "1".to_string()),
            ("line_items[0][adjustable_quantity][maximum]", "10".to_string()),
            ("customer_email", request.customer.email.clone()),
            ("metadata[customerInfo]", customer_info),
            ("metadata[promoCode]", request.promo_code.clone().unwrap_or_default()),
            ("metadata[idempotencyKey]", request.idempotency_key.clone().unwrap_or_default()),
            ("metadata[ticketLabel]", request.ticket_label.clone().unwrap_or_default()),
            ("return_url", return_url),
        ];
        if let Some(promotion_id) = promotion_code_id {
            form.push(("discounts[0][promotion_code]", promotion_id.to_string()));
        }

        let response = self
            .client
            .post(self.url("/v1/checkout/sessions"))
            .bearer_auth(&self.config.secret_key)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(&form)
            .send()
            .await?;

        let response = Self::check(response, "Checkout session creation").await?;
        let session: CheckoutSessionObject = response.json().await?;
        info!("Checkout session created: {}", session.id);
        Ok(session)
    }

    pub async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSessionObject> {
        let response = self
            .client
            .get(self.url(&format!("/v1/checkout/sessions/{}", session_id)))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await?;

        let response = Self::check(response, "Session retrieval").await?;
        Ok(response.json().await?)
    }

    /// Price id of the first line item. Multi-item checkouts silently take
    /// the first; see DESIGN.md.
    pub async fn first_line_item_price(&self, session_id: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(self.url(&format!("/v1/checkout/sessions/{}/line_items", session_id)))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await?;

        let response = Self::check(response, "Line item listing").await?;
        let list: LineItemList = response.json().await?;
        Ok(list.data.into_iter().next().and_then(|item| item.price.map(|p| p.id)))
    }
}

#[async_trait]
impl ProviderClient for StripeService {
    async fn initiate(&self, request: &InitiateRequest) -> Result<ProviderAck> {
        let promotion_code_id = match &request.promo_code {
            Some(code) if !code.is_empty() => {
                let resolved = self.find_promotion_code(code).await?;
                if resolved.is_none() {
                    return Err(AppError::invalid_data("Invalid promo code"));
                }
                resolved
            }
            _ => None,
        };

        let session = self
            .create_checkout_session(request, promotion_code_id.as_deref())
            .await?;

        Ok(ProviderAck {
            correlation_id: session.id,
            merchant_request_id: None,
            client_secret: session.client_secret,
            human_message: "Complete the payment in the embedded checkout".to_string(),
        })
    }

    /// Translates the session's payment status into the engine's result
    /// vocabulary: paid is final success, an expired session is a definite
    /// failure, anything else is still unresolved.
    async fn query_status(&self, correlation_id: &str) -> Result<ProviderStatus> {
        let session = self.retrieve_session(correlation_id).await?;

        let status = if session.is_paid() {
            ProviderStatus {
                result_code: RESULT_OK.to_string(),
                result_desc: "paid".to_string(),
            }
        } else if session.status.as_deref() == Some("expired") {
            ProviderStatus {
                result_code: "1".to_string(),
                result_desc: "Checkout session expired".to_string(),
            }
        } else {
            ProviderStatus {
                result_code: RESULT_STILL_PENDING.to_string(),
                result_desc: "Checkout session still open".to_string(),
            }
        };

        Ok(status)
    }
}
