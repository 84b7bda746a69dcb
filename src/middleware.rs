//! Route table and policy composition.
//!
//! Every policy is a `from_fn_with_state` layer added only when it is
//! configured; a disabled policy is absent from the stack, never a layer that
//! waves requests through. Execution order, outermost first:
//!
//! 1. endpoint filter (whole application)
//! 2. URL signature (image routes)
//! 3. image read-source check (image routes)
//! 4. method check and default headers
//! 5. JWT
//! 6. cache headers
//! 7. API key
//! 8. CORS
//! 9. rate limiter

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::Method,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::auth::{api_key_middleware, jwt_middleware, ApiKeyConfig, JwtGuard, JwtVerifier};
use crate::config::ServerOptions;
use crate::handlers::{self, AppState};
use crate::headers::{cache_headers_middleware, method_and_default_headers, CachePolicy};
use crate::policy::{endpoint_filter_middleware, image_source_middleware};
use crate::rate_limiter::{rate_limit_middleware, MethodRateLimiter};
use crate::signature::{url_signature_middleware, UrlSigner};
use crate::transform::Operation;

/// Policy instances built once from the options and shared by all routes
struct Policies {
    options: Arc<ServerOptions>,
    rate_limiter: Option<Arc<MethodRateLimiter>>,
    api_key: Option<Arc<ApiKeyConfig>>,
    jwt: Option<Arc<JwtVerifier>>,
    cache: Option<CachePolicy>,
    signer: Option<Arc<UrlSigner>>,
}

impl Policies {
    fn new(options: Arc<ServerOptions>) -> anyhow::Result<Self> {
        let rate_limiter = options
            .rate_limit
            .map(MethodRateLimiter::new)
            .transpose()?
            .map(Arc::new);
        let jwt = options
            .jwt
            .as_ref()
            .map(JwtVerifier::new)
            .transpose()?
            .map(Arc::new);
        let api_key = options.api_key.clone().map(|key| {
            Arc::new(ApiKeyConfig {
                key,
                options: options.clone(),
            })
        });
        let cache = options.http_cache_ttl.map(|ttl_secs| CachePolicy {
            ttl_secs,
            options: options.clone(),
        });
        let signer = options
            .url_signature_key
            .as_ref()
            .map(|key| Arc::new(UrlSigner::new(key.as_bytes())));

        tracing::info!(
            api_key = api_key.is_some(),
            jwt = jwt.is_some(),
            url_signature = signer.is_some(),
            rate_limit = rate_limiter.is_some(),
            cache_headers = cache.is_some(),
            cors = options.cors,
            disabled_endpoints = !options.endpoints.is_empty(),
            "Security policies configured"
        );

        Ok(Self {
            options,
            rate_limiter,
            api_key,
            jwt,
            cache,
            signer,
        })
    }

    /// Wrap `router` in the chain shared by public and image routes.
    ///
    /// Each `layer` call wraps the previous ones, so the innermost policy is
    /// added first.
    fn common(&self, mut router: Router<AppState>) -> Router<AppState> {
        if let Some(limiter) = &self.rate_limiter {
            router = router.layer(from_fn_with_state(limiter.clone(), rate_limit_middleware));
        }
        if self.options.cors {
            router = router.layer(cors_layer());
        }
        if let Some(api_key) = &self.api_key {
            router = router.layer(from_fn_with_state(api_key.clone(), api_key_middleware));
        }
        if let Some(cache) = &self.cache {
            router = router.layer(from_fn_with_state(cache.clone(), cache_headers_middleware));
        }
        if let Some(verifier) = &self.jwt {
            let guard = JwtGuard {
                verifier: Some(verifier.clone()),
                options: self.options.clone(),
                allow_public: true,
            };
            router = router.layer(from_fn_with_state(guard, jwt_middleware));
        }
        router.layer(from_fn(method_and_default_headers))
    }

    fn images(&self, mut router: Router<AppState>) -> Router<AppState> {
        router = self.common(router).layer(from_fn_with_state(
            self.options.clone(),
            image_source_middleware,
        ));
        if let Some(signer) = &self.signer {
            router = router.layer(from_fn_with_state(signer.clone(), url_signature_middleware));
        }
        router
    }

    /// Videos always demand a token; without a configured secret nothing passes.
    fn video(&self, router: Router<AppState>) -> Router<AppState> {
        let guard = JwtGuard {
            verifier: self.jwt.clone(),
            options: self.options.clone(),
            allow_public: false,
        };
        router
            .layer(from_fn_with_state(guard, jwt_middleware))
            .layer(from_fn(method_and_default_headers))
    }
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

fn image_routes() -> Router<AppState> {
    Operation::ALL
        .into_iter()
        .fold(Router::new(), |router, operation| {
            let handler = move |State(state): State<AppState>, request: Request| {
                handlers::image_handler(state, operation, request)
            };
            router.route(
                &format!("/{}", operation.name()),
                get(handler.clone()).post(handler),
            )
        })
}

/// Build the application router for `state`.
///
/// Fails when a policy cannot be constructed, so a misconfigured control
/// aborts startup instead of being skipped.
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let options = state.options.clone();
    let policies = Policies::new(options.clone())?;

    let public = policies.common(
        Router::new()
            .route("/", get(handlers::index_handler))
            .route(
                "/health",
                get(handlers::health_handler).post(handlers::health_handler),
            )
            .route("/form", get(handlers::form_handler).post(handlers::form_handler)),
    );
    let images = policies.images(image_routes());
    let video = policies.video(Router::new().route("/video", post(handlers::video_handler)));

    let routes = public.merge(images).merge(video);
    let mut app = if options.path_prefix.is_empty() {
        routes
    } else {
        Router::new().nest(&options.path_prefix, routes)
    };
    app = app.fallback(handlers::not_found_handler);

    if !options.endpoints.is_empty() {
        app = app.layer(from_fn_with_state(
            Arc::new(options.endpoints.clone()),
            endpoint_filter_middleware,
        ));
    }

    app = app.layer(match options.max_allowed_size {
        Some(limit) => DefaultBodyLimit::max(limit),
        None => DefaultBodyLimit::disable(),
    });

    let request_timeout = options.read_timeout + options.write_timeout;
    if !request_timeout.is_zero() {
        app = app.layer(TimeoutLayer::new(request_timeout));
    }

    Ok(app
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state))
}
