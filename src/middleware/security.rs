// middleware/security.rs
//
// Callback source verification and the initiation rate limit.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::errors::AppError;
use crate::state::AppState;

/// Published Safaricom callback source addresses.
const MPESA_IPS: &[&str] = &[
    "196.201.214.200",
    "196.201.214.206",
    "196.201.213.114",
    "196.201.214.207",
    "196.201.214.208",
    "196.201.213.44",
    "196.201.212.127",
    "196.201.212.138",
    "196.201.212.129",
    "196.201.212.136",
    "196.201.212.74",
];

const RATE_LIMIT_WINDOW_SECS: i64 = 60;
const RATE_LIMIT_MAX_REQUESTS: usize = 10;

/// Caller identity for the rate limit: the first forwarded-for hop when the
/// service sits behind a proxy, otherwise the socket address.
fn caller_identity(headers: &HeaderMap, addr: Option<&SocketAddr>) -> String {
    forwarded_ip(headers)
        .or_else(|| addr.map(|a| a.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

/// Sliding-window request counter keyed by caller identity. The clock is an
/// argument so tests can move time.
#[derive(Default)]
pub struct RateLimiter {
    requests: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, key: &str, now: DateTime<Utc>) -> bool {
        let window_start = now - Duration::seconds(RATE_LIMIT_WINDOW_SECS);
        let mut requests = self.requests.lock().unwrap();

        // Evict expired timestamps for every identity, not just the
        // caller's, so one-shot callers do not accumulate
        requests.retain(|_, stamps| {
            stamps.retain(|t| *t > window_start);
            !stamps.is_empty()
        });

        let timestamps = requests.entry(key.to_string()).or_default();
        if timestamps.len() >= RATE_LIMIT_MAX_REQUESTS {
            return false;
        }
        timestamps.push(now);
        true
    }
}

pub async fn rate_limit(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = caller_identity(request.headers(), connect_info.as_ref().map(|c| &c.0));

    if !state.rate_limiter.check(&key, Utc::now()) {
        warn!("Rate limit exceeded for {}", key);
        return Err(AppError::RateLimitExceeded);
    }

    Ok(next.run(request).await)
}

/// Restricts the STK callback to Safaricom's published addresses. Only
/// enforced in production; sandbox and local callbacks come from simulators
/// and tunnels.
pub async fn verify_callback_ip(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !state.config.is_production() {
        return Ok(next.run(request).await);
    }

    let ip = caller_identity(request.headers(), connect_info.as_ref().map(|c| &c.0));
    if !MPESA_IPS.contains(&ip.as_str()) {
        warn!("Rejected callback from unauthorized IP: {}", ip);
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(request).await)
}
