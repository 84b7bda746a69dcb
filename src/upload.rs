//! Ingestion pipeline: sniff, transform, name and publish an upload.

use axum::{
    http::{
        header::{CONTENT_TYPE, VARY},
        HeaderValue,
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;

use crate::constants::{DEFAULT_IMAGE_DEST, NAMING_EXCLUDED_PARAMS, NAME_HASH_LEN};
use crate::error::AppError;
use crate::handlers::AppState;
use crate::negotiate::negotiate;
use crate::query::QueryPairs;
use crate::source::Upload;
use crate::transform::{ImageOptions, Operation, OutputFormat};

/// Best guess at the mime type of an upload.
///
/// Magic numbers first, then the decoders of the image crate, then a textual
/// check for SVG documents.
pub fn sniff_mime(buf: &[u8]) -> String {
    let sniffed = infer::get(buf).map(|kind| kind.mime_type());
    if let Some(mime) = sniffed.filter(|m| !m.starts_with("text/")) {
        return mime.to_string();
    }

    if let Some(format) = image::guess_format(buf)
        .ok()
        .and_then(OutputFormat::from_image_format)
    {
        return format.mime().to_string();
    }

    // Textual bodies may still be SVG documents
    if buf.len() > 8 && is_svg(buf) {
        return "image/svg+xml".to_string();
    }

    sniffed.unwrap_or("application/octet-stream").to_string()
}

fn is_svg(buf: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(buf) else {
        return false;
    };
    let text = text.trim_start().to_ascii_lowercase();
    (text.starts_with("<?xml") || text.starts_with("<svg") || text.starts_with("<!doctype svg"))
        && text.contains("<svg")
}

/// Storage key for a derived artifact.
///
/// `dest/` prefix (none when `dest` is empty), a hash fragment of the naming
/// parameters before the extension, and `ext` replacing the extension when
/// given.
pub fn derive_filename(original: &str, dest: &str, query: &QueryPairs, ext: Option<&str>) -> String {
    let base = original.rsplit('/').next().unwrap_or(original);
    let (stem, old_ext) = match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (base, None),
    };

    let mut name = String::new();
    let dest = dest.trim_matches('/');
    if !dest.is_empty() {
        name.push_str(dest);
        name.push('/');
    }
    name.push_str(stem);

    let naming = query.without(NAMING_EXCLUDED_PARAMS);
    if !naming.is_empty() {
        let digest = format!("{:x}", md5::compute(naming.canonical()));
        name.push('-');
        name.push_str(&digest[..NAME_HASH_LEN]);
    }

    if let Some(ext) = ext.or(old_ext) {
        name.push('.');
        name.push_str(ext);
    }
    name
}

/// Name of the upload, or `image.<subtype>` when the client sent none.
fn original_name(file_name: Option<&str>, mime: &str) -> String {
    match file_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => name.to_string(),
        None => {
            let ext = mime.rsplit('/').next().unwrap_or("bin");
            format!("image.{}", ext.trim_end_matches("+xml"))
        }
    }
}

/// Run `operation` on the upload and publish the result.
///
/// The storage PUT is the only side effect and the last step.
pub async fn ingest_image(
    state: &AppState,
    operation: Operation,
    upload: Upload,
    query: &QueryPairs,
    accept: Option<&str>,
) -> Result<Response, AppError> {
    if upload.body.is_empty() {
        return Err(AppError::EmptyBody);
    }

    let mime = sniff_mime(&upload.body);
    if !state.backend.supports(&mime) {
        tracing::debug!(mime = %mime, "Rejected unsupported media");
        return Err(AppError::UnsupportedMedia);
    }

    let type_name = upload
        .type_name
        .as_deref()
        .filter(|t| !t.is_empty())
        .or_else(|| query.get_non_empty("type"));
    let negotiated = negotiate(type_name, accept)?;

    let mut options =
        ImageOptions::from_query(query).map_err(|e| AppError::BadRequest(e.to_string()))?;
    options.type_name = negotiated.format.map(|f| f.name().to_string());
    options.output = negotiated.format;

    let backend = state.backend.clone();
    let body = upload.body.clone();
    let processed = tokio::task::spawn_blocking(move || backend.process(operation, &body, &options))
        .await
        .map_err(|e| AppError::Internal(format!("image worker failed: {e}")))?
        .map_err(|e| {
            AppError::BadRequest(format!("Error while processing the image: {e}"))
        })?;

    let original = original_name(upload.file_name.as_deref(), &mime);
    let dest = upload
        .dest
        .as_deref()
        .or_else(|| query.get("dest"))
        .unwrap_or(DEFAULT_IMAGE_DEST);
    let ext = if operation == Operation::Info {
        Some("json")
    } else {
        negotiated.format.map(OutputFormat::name)
    };
    let key = derive_filename(&original, dest, query, ext);

    state
        .store
        .put(&key, Bytes::from(processed.body), &processed.mime)
        .await?;
    let url = state.store.public_url(&key);

    tracing::info!(
        operation = operation.name(),
        key = %key,
        mime = %processed.mime,
        "Published derived image"
    );

    let mut response = url.into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
    if negotiated.vary_accept {
        headers.insert(VARY, HeaderValue::from_static("Accept"));
    }
    Ok(response)
}
