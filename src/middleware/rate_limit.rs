use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::{
    AppState,
    admission::AdmissionError,
    cache::keys::rate_limit_key,
    error::AppError,
};

/// First path segment, so every feature gets its own window per caller
/// (`rejoindre:1.2.3.4`, `messages:1.2.3.4`, ...).
fn rate_scope(path: &str) -> &str {
    path.trim_start_matches('/')
        .split('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or("root")
}

/// Proxy headers first, socket peer as the fallback.
fn client_ip(req: &Request<Body>) -> String {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string());

    req.headers()
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
        })
        .or(peer.as_deref())
        .unwrap_or("unknown")
        .trim()
        .to_string()
}

/// Whole seconds for the Retry-After header, rounded up and never zero.
fn retry_after_secs(reset_ms: u64) -> u64 {
    reset_ms.div_ceil(1000).max(1)
}

pub async fn rate_limit(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let key = rate_limit_key(rate_scope(req.uri().path()), &client_ip(&req));

    let decision = state
        .admission
        .check_rate(
            &key,
            state.config.rate_limit_requests,
            state.config.rate_limit_window(),
        )
        .await
        .map_err(|e| match e {
            AdmissionError::StoreUnavailable(inner) => {
                tracing::error!(key, "admission check failed: {}", inner);
                AppError::CounterStoreUnavailable(inner.to_string())
            }
            AdmissionError::InvalidArgument(detail) => {
                tracing::error!(key, detail, "rate limit misconfigured");
                AppError::InternalServerError
            }
        })?;

    if !decision.allowed {
        tracing::debug!(key, reset_ms = decision.reset_ms, "write admission denied");
        return Err(AppError::RateLimited {
            retry_after_secs: retry_after_secs(decision.reset_ms),
        });
    }

    Ok(next.run(req).await)
}
