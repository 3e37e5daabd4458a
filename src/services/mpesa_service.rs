// services/mpesa_service.rs
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{error, info};

use crate::config::MpesaConfig;
use crate::errors::{AppError, Result};
use crate::services::provider::{InitiateRequest, ProviderAck, ProviderClient, ProviderStatus};

/// Reuse margin before the advertised token expiry. A token inside this
/// margin is treated as stale and re-requested.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 300;

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
    expires_in: String,
}

#[derive(Debug, Serialize)]
struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    business_short_code: String,
    #[serde(rename = "Password")]
    password: String,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "TransactionType")]
    transaction_type: String,
    #[serde(rename = "Amount")]
    amount: String,
    #[serde(rename = "PartyA")]
    party_a: String,
    #[serde(rename = "PartyB")]
    party_b: String,
    #[serde(rename = "PhoneNumber")]
    phone_number: String,
    #[serde(rename = "CallBackURL")]
    callback_url: String,
    #[serde(rename = "AccountReference")]
    account_reference: String,
    #[serde(rename = "TransactionDesc")]
    transaction_desc: String,
}

#[derive(Debug, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
    #[serde(rename = "CustomerMessage")]
    pub customer_message: String,
}

#[derive(Debug, Serialize)]
struct StkQueryRequest {
    #[serde(rename = "BusinessShortCode")]
    business_short_code: String,
    #[serde(rename = "Password")]
    password: String,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
}

#[derive(Debug, Deserialize)]
pub struct StkQueryResponse {
    #[serde(rename = "ResultCode")]
    pub result_code: String,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID", default)]
    pub checkout_request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MpesaErrorBody {
    #[serde(rename = "errorMessage", default)]
    error_message: Option<String>,
    #[serde(rename = "errorCode", default)]
    error_code: Option<String>,
}

#[derive(Clone)]
pub struct MpesaService {
    config: MpesaConfig,
    client: Client,
    cached_token: Arc<RwLock<Option<(String, DateTime<Utc>)>>>,
}

impl MpesaService {
    pub fn new(config: MpesaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(MpesaService {
            config,
            client,
            cached_token: Arc::new(RwLock::new(None)),
        })
    }

    /// Normalize a Kenyan phone number to 254XXXXXXXXX.
    pub fn format_phone_number(phone: &str) -> Result<String> {
        let cleaned: String = phone
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '+' | '(' | ')'))
            .collect();

        let formatted = if cleaned.starts_with("254") {
            cleaned
        } else if let Some(rest) = cleaned.strip_prefix('0') {
            format!("254{}", rest)
        } else {
            format!("254{}", cleaned)
        };

        if formatted.len() != 12 || !formatted.chars().all(|c| c.is_ascii_digit()) {
            return Err(AppError::invalid_data(
                "Invalid phone number format. Expected format: 254XXXXXXXXX",
            ));
        }
        Ok(formatted)
    }

    fn generate_password(&self, timestamp: &str) -> String {
        base64.encode(format!(
            "{}{}{}",
            self.config.short_code, self.config.passkey, timestamp
        ))
    }

    pub async fn get_access_token(&self) -> Result<String> {
        {
            let cached = self.cached_token.read().unwrap();
            if let Some((token, expiry)) = cached.as_ref() {
                if *expiry > Utc::now() + chrono::Duration::seconds(TOKEN_EXPIRY_MARGIN_SECS) {
                    return Ok(token.clone());
                }
            }
        }

        info!("Requesting new M-Pesa access token");
        let encoded_auth = base64.encode(format!(
            "{}:{}",
            self.config.consumer_key, self.config.consumer_secret
        ));

        let response = self
            .client
            .get(self.config.auth_url())
            .header(header::AUTHORIZATION, format!("Basic {}", encoded_auth))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Failed to get access token: {} - {}", status, body);
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::BAD_REQUEST {
                return Err(AppError::rejected(
                    "Invalid M-Pesa credentials. Verify the consumer key and secret and the configured environment.",
                ));
            }
            return Err(AppError::unreachable(format!("M-Pesa auth failed: {}", status)));
        }

        let auth_response: AuthResponse = response.json().await?;
        let lifetime = auth_response.expires_in.parse::<i64>().unwrap_or(3599);
        let expiry = Utc::now() + chrono::Duration::seconds(lifetime);

        {
            let mut cached = self.cached_token.write().unwrap();
            *cached = Some((auth_response.access_token.clone(), expiry));
        }

        info!("M-Pesa access token obtained");
        Ok(auth_response.access_token)
    }

    pub async fn initiate_stk_push(
        &self,
        phone_number: &str,
        amount: f64,
        account_reference: &str,
        transaction_desc: &str,
    ) -> Result<StkPushResponse> {
        if amount < 1.0 {
            return Err(AppError::invalid_data("Amount must be at least 1 KES"));
        }

        let access_token = self.get_access_token().await?;
        let formatted_phone = Self::format_phone_number(phone_number)?;
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let password = self.generate_password(&timestamp);

        // M-Pesa only takes whole amounts
        let whole_amount = amount.ceil() as i64;

        info!(
            "STK push for {} - KSh {} ({})",
            formatted_phone, whole_amount, account_reference
        );

        let stk_request = StkPushRequest {
            business_short_code: self.config.short_code.clone(),
            password,
            timestamp,
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount: whole_amount.to_string(),
            party_a: formatted_phone.clone(),
            party_b: self.config.short_code.clone(),
            phone_number: formatted_phone,
            callback_url: self.config.callback_url.clone(),
            account_reference: account_reference.to_string(),
            transaction_desc: transaction_desc.to_string(),
        };

        let response = self
            .client
            .post(self.config.stk_push_url())
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&stk_request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response, "STK push").await);
        }

        let stk_response: StkPushResponse = response.json().await?;
        info!("STK push accepted: {}", stk_response.checkout_request_id);
        Ok(stk_response)
    }

    pub async fn query_stk_status(&self, checkout_request_id: &str) -> Result<StkQueryResponse> {
        let access_token = self.get_access_token().await?;
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let password = self.generate_password(&timestamp);

        let query_request = StkQueryRequest {
            business_short_code: self.config.short_code.clone(),
            password,
            timestamp,
            checkout_request_id: checkout_request_id.to_string(),
        };

        info!("Querying STK status: {}", checkout_request_id);

        let response = self
            .client
            .post(self.config.stk_query_url())
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&query_request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response, "STK query").await);
        }

        Ok(response.json().await?)
    }

    /// 4xx means the provider synchronously declined; anything else (the
    /// query API answers 500 while a push is still processing) is an
    /// unknown outcome, never a verdict.
    async fn error_from_response(response: reqwest::Response, action: &str) -> AppError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        error!("{} failed: {} - {}", action, status, body);

        let message = serde_json::from_str::<MpesaErrorBody>(&body)
            .ok()
            .and_then(|e| e.error_message.or(e.error_code))
            .unwrap_or_else(|| format!("{} failed: {}", action, status));

        if status.is_client_error() {
            AppError::rejected(message)
        } else {
            AppError::unreachable(message)
        }
    }
}

#[async_trait]
impl ProviderClient for MpesaService {
    async fn initiate(&self, request: &InitiateRequest) -> Result<ProviderAck> {
        let response = self
            .initiate_stk_push(
                &request.payer,
                request.amount,
                &request.reference,
                &request.description,
            )
            .await?;

        Ok(ProviderAck {
            correlation_id: response.checkout_request_id,
            merchant_request_id: Some(response.merchant_request_id),
            client_secret: None,
            human_message: if response.customer_message.is_empty() {
                "Please check your phone for the M-Pesa prompt".to_string()
            } else {
                response.customer_message
            },
        })
    }

    async fn query_status(&self, correlation_id: &str) -> Result<ProviderStatus> {
        let response = self.query_stk_status(correlation_id).await?;
        Ok(ProviderStatus {
            result_code: response.result_code,
            result_desc: response.result_desc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_local_phone_numbers() {
        assert_eq!(
            MpesaService::format_phone_number("0712345678").unwrap(),
            "254712345678"
        );
        assert_eq!(
            MpesaService::format_phone_number("712345678").unwrap(),
            "254712345678"
        );
        assert_eq!(
            MpesaService::format_phone_number("254712345678").unwrap(),
            "254712345678"
        );
        assert_eq!(
            MpesaService::format_phone_number("+254 712 345-678").unwrap(),
            "254712345678"
        );
    }

    #[test]
    fn rejects_malformed_phone_numbers() {
        assert!(MpesaService::format_phone_number("12345").is_err());
        assert!(MpesaService::format_phone_number("07123456789999").is_err());
        assert!(MpesaService::format_phone_number("07abc45678").is_err());
    }
}
