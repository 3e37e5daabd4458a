// models/stk_callback.rs
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct CallbackData {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item")]
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<serde_json::Value>,
}

/// The named metadata items of a successful STK callback, parsed into an
/// explicit optional-field record. Safaricom omits items freely, so every
/// field is absent-by-default.
#[derive(Debug, Default, Clone)]
pub struct StkMetadata {
    pub amount: Option<f64>,
    pub receipt_number: Option<String>,
    pub transaction_date: Option<DateTime<Utc>>,
    pub phone_number: Option<String>,
}

impl StkCallback {
    pub fn metadata(&self) -> StkMetadata {
        let mut parsed = StkMetadata::default();
        let Some(metadata) = &self.callback_metadata else {
            return parsed;
        };

        for item in &metadata.items {
            let Some(value) = &item.value else { continue };
            match item.name.as_str() {
                "Amount" => parsed.amount = value.as_f64(),
                "MpesaReceiptNumber" => {
                    parsed.receipt_number = value.as_str().map(|s| s.to_string());
                }
                "TransactionDate" => {
                    parsed.transaction_date = parse_mpesa_timestamp(value);
                }
                "PhoneNumber" => {
                    // Sent as a number; keep the digits either way.
                    parsed.phone_number = match value {
                        serde_json::Value::String(s) => Some(s.clone()),
                        other => other.as_i64().map(|n| n.to_string()),
                    };
                }
                _ => {}
            }
        }

        parsed
    }
}

/// M-Pesa timestamps arrive as the number 20191219102115 (YYYYMMDDHHMMSS,
/// Nairobi local time, stored as-is).
fn parse_mpesa_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    let digits = match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.as_i64()?.to_string(),
    };
    NaiveDateTime::parse_from_str(&digits, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}
