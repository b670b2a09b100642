//! In-memory token-bucket rate limiter for the Vigil API.
//!
//! Each client IP gets an independent bucket with a configurable burst and
//! refill rate. When exhausted, the middleware answers `429` with a
//! `Retry-After` header.

use axum::{
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use vigil_config::ServerConfig;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Maximum burst size (tokens in the bucket).
    pub burst: u32,
    /// Tokens refilled per second.
    pub refill_per_sec: f64,
}

impl From<&ServerConfig> for RateLimitConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            burst: config.rate_limit_burst,
            refill_per_sec: config.rate_limit_per_sec,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    touched: Instant,
}

/// Buckets keyed by client IP.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<DashMap<IpAddr, Bucket>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: Arc::new(DashMap::new()),
            config,
        }
    }

    /// `Err(retry_after_secs)` when the client must wait.
    pub fn check(&self, ip: IpAddr) -> Result<(), u64> {
        let RateLimitConfig {
            burst,
            refill_per_sec,
        } = self.config;
        let now = Instant::now();
        let mut bucket = self.buckets.entry(ip).or_insert(Bucket {
            tokens: f64::from(burst),
            touched: now,
        });

        let elapsed = now.duration_since(bucket.touched).as_secs_f64();
        bucket.tokens = f64::from(burst).min(bucket.tokens + elapsed * refill_per_sec);
        bucket.touched = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }
        if refill_per_sec <= 0.0 {
            return Err(60);
        }
        Err(((1.0 - bucket.tokens) / refill_per_sec).ceil().max(1.0) as u64)
    }

    /// Evict buckets unused for five minutes.
    pub fn cleanup(&self) {
        let Some(cutoff) = Instant::now().checked_sub(Duration::from_secs(300)) else {
            return;
        };
        self.buckets.retain(|_, bucket| bucket.touched > cutoff);
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }
}

pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let ip = extract_client_ip(&req);
    match state.limiter.check(ip) {
        Ok(()) => next.run(req).await,
        Err(retry_after) => {
            warn!(client_ip = %ip, retry_after, "rate limited");
            state.metrics.inc_rate_limit_rejections();
            ApiError::rate_limited(retry_after).into_response()
        }
    }
}

/// Client IP from `X-Forwarded-For`, then `X-Real-IP`, else loopback.
fn extract_client_ip(req: &Request<axum::body::Body>) -> IpAddr {
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(val) = forwarded.to_str()
        && let Some(first) = val.split(',').next()
        && let Ok(ip) = first.trim().parse::<IpAddr>()
    {
        return ip;
    }
    if let Some(real_ip) = req.headers().get("x-real-ip")
        && let Ok(val) = real_ip.to_str()
        && let Ok(ip) = val.trim().parse::<IpAddr>()
    {
        return ip;
    }
    IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)
}
