// middleware/stripe_webhook.rs
//
// Stripe-Signature verification over the raw request body. Verification
// happens before any JSON parsing; a failure is answered with 400 so the
// sender's retry machinery engages.
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::errors::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Accepted age of a signed payload. Replays older than this are rejected;
/// a small allowance covers clock skew in the other direction.
const TOLERANCE_SECS: i64 = 300;
const CLOCK_SKEW_SECS: i64 = 60;

/// Parsed `Stripe-Signature` header: `t=<unix>,v1=<hex>[,v1=<hex>...]`.
#[derive(Debug)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => {
                    timestamp = value.parse::<i64>().ok();
                }
                "v1" => signatures.push(value.to_string()),
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| AppError::InvalidSignature("missing timestamp".to_string()))?;
        if signatures.is_empty() {
            return Err(AppError::InvalidSignature("no v1 signature".to_string()));
        }

        Ok(SignatureHeader { timestamp, signatures })
    }
}

#[derive(Clone)]
pub struct StripeWebhookVerifier {
    secret: String,
}

impl StripeWebhookVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        StripeWebhookVerifier { secret: secret.into() }
    }

    /// Verify `payload` against the raw `Stripe-Signature` header value.
    pub fn verify(&self, payload: &[u8], header: &str) -> Result<()> {
        self.verify_at(payload, header, Utc::now().timestamp())
    }

    fn verify_at(&self, payload: &[u8], header: &str, now: i64) -> Result<()> {
        let parsed = SignatureHeader::parse(header)?;

        let age = now - parsed.timestamp;
        if age > TOLERANCE_SECS || age < -CLOCK_SKEW_SECS {
            return Err(AppError::InvalidSignature(
                "timestamp outside tolerance".to_string(),
            ));
        }

        let expected = self.sign(payload, parsed.timestamp)?;

        for candidate in &parsed.signatures {
            let Ok(candidate_bytes) = hex::decode(candidate) else {
                continue;
            };
            if candidate_bytes.ct_eq(&expected).into() {
                return Ok(());
            }
        }

        Err(AppError::InvalidSignature("signature mismatch".to_string()))
    }

    fn sign(&self, payload: &[u8], timestamp: i64) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| AppError::configuration("invalid webhook secret"))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}
