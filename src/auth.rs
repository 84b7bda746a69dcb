use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::{JwtOptions, ServerOptions};
use crate::constants::{API_KEY_HEADER, API_KEY_PARAM, JWT_PARAM};
use crate::error::AppError;
use crate::query::QueryPairs;

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ApiKeyConfig {
    pub key: String,
    #[zeroize(skip)]
    pub options: Arc<ServerOptions>,
}

/// Middleware for static API key authorization
pub async fn api_key_middleware(
    State(config): State<Arc<ApiKeyConfig>>,
    request: Request,
    next: Next,
) -> Response {
    if is_public_get(&config.options, &request) {
        return next.run(request).await;
    }

    let query = QueryPairs::parse(request.uri().query());
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .filter(|k| !k.is_empty())
        .or_else(|| query.get(API_KEY_PARAM))
        .unwrap_or_default();

    // Use constant-time comparison to prevent timing attacks
    if bool::from(provided.as_bytes().ct_eq(config.key.as_bytes())) {
        return next.run(request).await;
    }

    tracing::debug!(path = %request.uri().path(), "Rejected request with invalid API key");
    AppError::InvalidApiKey.into_response()
}

fn is_public_get(options: &ServerOptions, request: &Request) -> bool {
    request.method() == Method::GET && options.is_public_path(request.uri().path())
}

/// Bearer token verifier bound to a single configured algorithm.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(options: &JwtOptions) -> anyhow::Result<Self> {
        let key = decoding_key(options.algorithm, &options.secret)?;

        let mut validation = Validation::new(options.algorithm);
        // Claims are optional; `exp` and `nbf` are enforced when present
        validation.required_spec_claims.clear();
        validation.validate_nbf = true;
        validation.validate_aud = false;

        Ok(Self { key, validation })
    }

    /// Verify `token`, rejecting any token not signed with the configured algorithm.
    pub fn verify(&self, token: &str) -> Result<(), AppError> {
        let header = decode_header(token).map_err(|e| {
            tracing::debug!(error = %e, "Malformed JWT");
            AppError::InvalidToken
        })?;

        if !self.validation.algorithms.contains(&header.alg) {
            tracing::debug!(alg = ?header.alg, "Unexpected JWT signing method");
            return Err(AppError::InvalidToken);
        }

        decode::<serde_json::Value>(token, &self.key, &self.validation)
            .map(|_| ())
            .map_err(|e| {
                tracing::debug!(error = %e, "JWT verification failed");
                AppError::InvalidToken
            })
    }
}

fn decoding_key(algorithm: Algorithm, secret: &[u8]) -> anyhow::Result<DecodingKey> {
    let key = match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => DecodingKey::from_secret(secret),
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => DecodingKey::from_rsa_pem(secret)?,
        Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(secret)?,
        Algorithm::EdDSA => DecodingKey::from_ed_pem(secret)?,
        #[allow(unreachable_patterns)]
        other => anyhow::bail!("Unsupported JWT algorithm: {other:?}"),
    };
    Ok(key)
}

/// Pull the token from `Authorization: Bearer <token>`, falling back to the `jwt`
/// query parameter. A present but malformed `Authorization` header is an error.
pub fn extract_token(request: &Request) -> Result<String, AppError> {
    if let Some(value) = request.headers().get(header::AUTHORIZATION) {
        let value = value.to_str().map_err(|_| AppError::InvalidToken)?;
        if !value.is_empty() {
            let parts: Vec<&str> = value.split(' ').collect();
            return match parts.as_slice() {
                ["Bearer", token] => Ok(token.to_string()),
                _ => Err(AppError::InvalidToken),
            };
        }
    }

    let query = QueryPairs::parse(request.uri().query());
    Ok(query.get(JWT_PARAM).unwrap_or_default().to_string())
}

#[derive(Clone)]
pub struct JwtGuard {
    /// `None` rejects every request; used where a route demands a token but no
    /// secret is configured.
    pub verifier: Option<Arc<JwtVerifier>>,
    pub options: Arc<ServerOptions>,
    pub allow_public: bool,
}

/// Middleware for bearer token (JWT) verification
pub async fn jwt_middleware(State(guard): State<JwtGuard>, request: Request, next: Next) -> Response {
    if guard.allow_public && is_public_get(&guard.options, &request) {
        return next.run(request).await;
    }

    let verdict = match &guard.verifier {
        Some(verifier) => extract_token(&request).and_then(|token| verifier.verify(&token)),
        None => Err(AppError::InvalidToken),
    };

    match verdict {
        Ok(()) => next.run(request).await,
        Err(err) => err.into_response(),
    }
}
