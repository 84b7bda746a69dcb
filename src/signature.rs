//! HMAC-SHA256 URL signatures.
//!
//! The signed message is the request path immediately followed by the canonical
//! query string (see [`crate::query`]) with the `sign` parameter removed. The
//! signature travels in `sign` as URL-safe base64 without padding.

use std::sync::Arc;

use axum::{
    extract::{OriginalUri, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::SIGNATURE_PARAM;
use crate::error::AppError;
use crate::query::QueryPairs;

type HmacSha256 = Hmac<Sha256>;

#[derive(Zeroize, ZeroizeOnDrop)]
pub struct UrlSigner {
    key: Vec<u8>,
}

impl UrlSigner {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    fn digest(&self, path: &str, query: &QueryPairs) -> Result<HmacSha256, AppError> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| AppError::Internal(format!("URL signature key rejected: {e}")))?;
        mac.update(path.as_bytes());
        mac.update(query.without(&[SIGNATURE_PARAM]).canonical().as_bytes());
        Ok(mac)
    }

    /// Compute the `sign` value for `path` and `query`.
    ///
    /// Any `sign` pair already present in `query` is ignored.
    pub fn sign(&self, path: &str, query: &QueryPairs) -> Result<String, AppError> {
        let mac = self.digest(path, query)?;
        Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    /// Check the `sign` parameter carried in `query`.
    pub fn verify(&self, path: &str, query: &QueryPairs) -> Result<(), AppError> {
        let presented = query.get(SIGNATURE_PARAM).unwrap_or_default();
        let presented = URL_SAFE_NO_PAD
            .decode(presented)
            .map_err(|_| AppError::InvalidSignature)?;

        // verify_slice compares in constant time
        self.digest(path, query)?
            .verify_slice(&presented)
            .map_err(|_| AppError::SignatureMismatch)
    }
}

/// Middleware rejecting requests whose URL signature does not verify
pub async fn url_signature_middleware(
    State(signer): State<Arc<UrlSigner>>,
    request: Request,
    next: Next,
) -> Response {
    // Signatures cover the path as requested, including any prefix
    let path = request
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.path().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let query = QueryPairs::parse(request.uri().query());

    match signer.verify(&path, &query) {
        Ok(()) => next.run(request).await,
        Err(err) => {
            tracing::warn!(path = %path, "Rejected request with bad URL signature");
            err.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    fn signed_query(signer: &UrlSigner, path: &str, raw: &str) -> QueryPairs {
        let query = QueryPairs::parse(Some(raw));
        let sign = signer.sign(path, &query).unwrap();
        let mut pairs: Vec<(String, String)> = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        pairs.push(("sign".to_string(), sign));
        QueryPairs::from_pairs(pairs)
    }

    #[test]
    fn test_valid_signature_is_accepted() {
        let signer = UrlSigner::new(KEY);
        let query = signed_query(&signer, "/resize", "width=300&height=200");
        assert!(signer.verify("/resize", &query).is_ok());
    }

    #[test]
    fn test_signature_ignores_parameter_order() {
        let signer = UrlSigner::new(KEY);
        let signed = signed_query(&signer, "/resize", "width=300&height=200");
        let sign = signed.get("sign").unwrap().to_string();

        let reordered = QueryPairs::from_pairs([
            ("sign", sign.as_str()),
            ("height", "200"),
            ("width", "300"),
        ]);
        assert!(signer.verify("/resize", &reordered).is_ok());
    }

    #[test]
    fn test_flipped_signature_bit_is_rejected() {
        let signer = UrlSigner::new(KEY);
        let query = signed_query(&signer, "/resize", "width=300");
        let raw = URL_SAFE_NO_PAD.decode(query.get("sign").unwrap()).unwrap();

        for bit in [0usize, 7, 100, 255] {
            let mut flipped = raw.clone();
            flipped[bit / 8] ^= 1 << (bit % 8);
            let tampered = QueryPairs::from_pairs([
                ("width", "300".to_string()),
                ("sign", URL_SAFE_NO_PAD.encode(&flipped)),
            ]);
            let err = signer.verify("/resize", &tampered).unwrap_err();
            assert!(matches!(err, AppError::SignatureMismatch));
        }
    }

    #[test]
    fn test_tampered_query_is_rejected() {
        let signer = UrlSigner::new(KEY);
        let query = signed_query(&signer, "/resize", "width=300");
        let sign = query.get("sign").unwrap().to_string();

        let tampered = QueryPairs::from_pairs([("width", "301"), ("sign", sign.as_str())]);
        assert!(matches!(
            signer.verify("/resize", &tampered),
            Err(AppError::SignatureMismatch)
        ));
        assert!(matches!(
            signer.verify("/crop", &query),
            Err(AppError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_undecodable_signature_is_invalid() {
        let signer = UrlSigner::new(KEY);
        let query = QueryPairs::from_pairs([("width", "300"), ("sign", "not base64!")]);
        assert!(matches!(
            signer.verify("/resize", &query),
            Err(AppError::InvalidSignature)
        ));

        // padded base64 is not accepted either
        let padded = QueryPairs::from_pairs([("sign", "YWJj=")]);
        assert!(matches!(
            signer.verify("/resize", &padded),
            Err(AppError::InvalidSignature)
        ));
    }

    #[test]
    fn test_missing_signature_has_same_status_as_mismatch() {
        let signer = UrlSigner::new(KEY);
        let missing = signer
            .verify("/resize", &QueryPairs::parse(Some("width=300")))
            .unwrap_err();
        assert_eq!(missing.status(), AppError::SignatureMismatch.status());
        assert_eq!(missing.status(), AppError::InvalidSignature.status());
    }
}
