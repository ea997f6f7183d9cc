use std::net::SocketAddr;

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::services::rate_limiter::{RateDecision, RateLimiter};

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

pub async fn enforce(State(limiter): State<RateLimiter>, request: Request, next: Next) -> Response {
    let client = client_key(&request);

    match limiter.check(&client).await {
        RateDecision::Allowed { limit, remaining } => {
            let mut response = next.run(request).await;
            set_limit_headers(response.headers_mut(), limit, remaining);
            response
        }
        RateDecision::Limited { limit, retry_after } => {
            let body = json!({
                "error": "Too many requests, please try again later.",
                "retryAfter": retry_after,
            });

            let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            let headers = response.headers_mut();
            set_limit_headers(headers, limit, 0);
            headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
            response
        }
    }
}

fn set_limit_headers(headers: &mut HeaderMap, limit: u64, remaining: u64) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(remaining));
}

/// Peer address, then the first `X-Forwarded-For` hop, then `unknown`.
pub fn client_key(request: &Request) -> String {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "unknown".to_string())
}
