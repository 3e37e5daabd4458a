// config.rs
use std::env;

use crate::errors::{AppError, Result};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: String,
    pub database_url: String,
    pub database_name: String,
    pub frontend_url: String,
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub short_code: String,
    pub passkey: String,
    pub callback_url: String,
    pub environment: String,
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base_url: String,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_url: String,
    pub api_key: String,
    pub from_address: String,
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| AppError::configuration(format!("{} must be set", name)))
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(AppConfig {
            environment: env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "sandbox".to_string()),
            database_url: required("DATABASE_URL")?,
            database_name: env::var("DATABASE_NAME").unwrap_or_else(|_| "ticketsdb".to_string()),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "4242".to_string())
                .parse()
                .map_err(|_| AppError::configuration("PORT must be a number"))?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl MpesaConfig {
    pub fn from_env() -> Result<Self> {
        Ok(MpesaConfig {
            consumer_key: required("MPESA_CONSUMER_KEY")?,
            consumer_secret: required("MPESA_CONSUMER_SECRET")?,
            short_code: required("MPESA_SHORT_CODE")?,
            passkey: required("MPESA_PASSKEY")?,
            callback_url: required("MPESA_CALLBACK_URL")?,
            environment: env::var("MPESA_ENVIRONMENT").unwrap_or_else(|_| "sandbox".to_string()),
        })
    }

    pub fn base_url(&self) -> &'static str {
        if self.environment == "production" {
            "https://api.safaricom.co.ke"
        } else {
            "https://sandbox.safaricom.co.ke"
        }
    }

    pub fn auth_url(&self) -> String {
        format!("{}/oauth/v1/generate?grant_type=client_credentials", self.base_url())
    }

    pub fn stk_push_url(&self) -> String {
        format!("{}/mpesa/stkpush/v1/processrequest", self.base_url())
    }

    pub fn stk_query_url(&self) -> String {
        format!("{}/mpesa/stkpushquery/v1/query", self.base_url())
    }
}

impl StripeConfig {
    pub fn from_env() -> Result<Self> {
        Ok(StripeConfig {
            secret_key: required("STRIPE_SECRET_KEY")?,
            webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
            api_base_url: env::var("STRIPE_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
        })
    }
}

impl EmailConfig {
    pub fn from_env() -> Result<Self> {
        Ok(EmailConfig {
            api_url: required("EMAIL_API_URL")?,
            api_key: required("EMAIL_API_KEY")?,
            from_address: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "tickets@summit.example.com".to_string()),
        })
    }
}
