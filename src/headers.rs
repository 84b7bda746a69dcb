use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{
        header::{CACHE_CONTROL, EXPIRES, SERVER, X_CONTENT_TYPE_OPTIONS},
        HeaderValue, Method,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{TimeDelta, Utc};

use crate::config::ServerOptions;
use crate::constants;
use crate::error::AppError;
use crate::policy::is_allowed_method;

/// Outermost layer of every route: rejects methods other than GET/POST and
/// stamps the default headers on everything it lets through.
pub async fn method_and_default_headers(request: Request, next: Next) -> Response {
    if !is_allowed_method(request.method()) {
        return AppError::MethodNotAllowed.into_response();
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    if let Ok(value) = HeaderValue::from_str(&server_banner()) {
        headers.insert(SERVER, value);
    }

    // X-Content-Type-Options: Prevent MIME sniffing of the returned URL
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));

    response
}

#[derive(Clone)]
pub struct CachePolicy {
    pub ttl_secs: u64,
    pub options: Arc<ServerOptions>,
}

/// Middleware adding `Expires` and `Cache-Control` to non-public GET responses
pub async fn cache_headers_middleware(
    State(policy): State<CachePolicy>,
    request: Request,
    next: Next,
) -> Response {
    let cacheable =
        request.method() == Method::GET && !policy.options.is_public_path(request.uri().path());

    let mut response = next.run(request).await;
    if !cacheable {
        return response;
    }

    let headers = response.headers_mut();
    if let Some(expires) = expires_at(policy.ttl_secs) {
        if let Ok(value) = HeaderValue::from_str(&expires) {
            headers.insert(EXPIRES, value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(&cache_control(policy.ttl_secs)) {
        headers.insert(CACHE_CONTROL, value);
    }

    response
}

/// HTTP date `ttl_secs` from now, `None` past the representable range.
fn expires_at(ttl_secs: u64) -> Option<String> {
    let ttl = TimeDelta::try_seconds(i64::try_from(ttl_secs).ok()?)?;
    let expires = Utc::now().checked_add_signed(ttl)?;
    Some(expires.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}

pub fn cache_control(ttl_secs: u64) -> String {
    if ttl_secs == 0 {
        return "private, no-cache, no-store, must-revalidate".to_string();
    }
    format!("public, s-maxage={ttl_secs}, max-age={ttl_secs}, no-transform")
}

/// Value of the `Server` header
pub fn server_banner() -> String {
    format!("{} {}", constants::APP_NAME, constants::VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_control_values() {
        assert_eq!(cache_control(0), "private, no-cache, no-store, must-revalidate");
        assert_eq!(cache_control(60), "public, s-maxage=60, max-age=60, no-transform");
    }

    #[test]
    fn test_expires_is_skipped_out_of_range() {
        assert!(expires_at(60).unwrap().ends_with(" GMT"));
        assert!(expires_at(10_000_000_000_000).is_none());
        assert!(expires_at(u64::MAX).is_none());
    }
}
