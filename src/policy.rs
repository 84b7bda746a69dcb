//! Static admission policies: endpoint deny-list, method check and the
//! read-source rule for image routes.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::{Endpoints, ServerOptions};
use crate::error::AppError;

/// Middleware replying 501 for endpoints in the deny-list
pub async fn endpoint_filter_middleware(
    State(endpoints): State<Arc<Endpoints>>,
    request: Request,
    next: Next,
) -> Response {
    if endpoints.is_allowed(request.uri().path()) {
        return next.run(request).await;
    }

    tracing::debug!(path = %request.uri().path(), "Disabled endpoint requested");
    AppError::NotImplemented.into_response()
}

/// Only GET and POST are served
pub fn is_allowed_method(method: &Method) -> bool {
    method == Method::GET || method == Method::POST
}

/// Middleware applying the read-source rule to image routes.
///
/// Image operations consume a request body, so a non-public GET is only
/// meaningful when the image can come from the mount directory or a remote URL.
pub async fn image_source_middleware(
    State(options): State<Arc<ServerOptions>>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() == Method::GET
        && !options.is_public_path(request.uri().path())
        && options.mount.is_none()
        && !options.enable_url_source
    {
        return AppError::MethodNotAllowed.into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_get_and_post_are_allowed() {
        assert!(is_allowed_method(&Method::GET));
        assert!(is_allowed_method(&Method::POST));
        for method in [Method::PUT, Method::DELETE, Method::PATCH, Method::HEAD, Method::OPTIONS] {
            assert!(!is_allowed_method(&method));
        }
    }
}
