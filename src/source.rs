//! Where the bytes of an upload come from: request bodies, the mount
//! directory or remote URLs.

use std::path::Path;

use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Request},
    http::{header::CONTENT_TYPE, Method},
};
use bytes::BytesMut;
use url::Url;

use crate::config::ServerOptions;
use crate::constants::FORM_FIELD_NAME;
use crate::error::AppError;
use crate::query::QueryPairs;

/// Raw upload plus the metadata that travelled with it
#[derive(Debug, Default)]
pub struct Upload {
    pub body: Bytes,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    /// `dest` form field
    pub dest: Option<String>,
    /// `type` form field
    pub type_name: Option<String>,
}

/// Read the upload of a request: multipart from POST bodies, or the mount
/// directory / a remote URL for GET.
pub async fn read_image(
    request: Request,
    options: &ServerOptions,
    client: &reqwest::Client,
) -> Result<Upload, AppError> {
    if request.method() != Method::GET {
        return read_body(request).await;
    }

    let query = QueryPairs::parse(request.uri().query());
    if let (Some(mount), Some(file)) = (&options.mount, query.get_non_empty("file")) {
        return read_mount(mount, file).await;
    }
    if options.enable_url_source {
        if let Some(url) = query.get_non_empty("url") {
            return fetch_url(client, url, options).await;
        }
    }

    Err(AppError::MissingImageSource)
}

/// Read a POST body, either multipart with a `file` part or the raw bytes.
pub async fn read_body(request: Request) -> Result<Upload, AppError> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    if !is_multipart {
        let body = Bytes::from_request(request, &())
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        return Ok(Upload {
            body,
            ..Upload::default()
        });
    }

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?;

    let mut upload = Upload::default();
    let mut found = false;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            FORM_FIELD_NAME => {
                upload.file_name = field.file_name().map(String::from);
                upload.content_type = field.content_type().map(String::from);
                upload.body = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.body_text()))?;
                found = true;
            }
            "dest" => upload.dest = Some(text(field).await?),
            "type" => upload.type_name = Some(text(field).await?),
            _ => {}
        }
    }

    if !found {
        return Err(AppError::MissingImageSource);
    }
    Ok(upload)
}

async fn text(field: axum::extract::multipart::Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))
}

async fn read_mount(mount: &Path, file: &str) -> Result<Upload, AppError> {
    let root = tokio::fs::canonicalize(mount)
        .await
        .map_err(|e| AppError::Internal(format!("mount directory unavailable: {e}")))?;

    // Canonicalize to prevent path traversal attacks
    let full_path = tokio::fs::canonicalize(root.join(file.trim_start_matches('/')))
        .await
        .map_err(|_| AppError::BadRequest(format!("file not found: {file}")))?;
    if !full_path.starts_with(&root) || !full_path.is_file() {
        tracing::warn!(file, "Rejected file outside of the mount directory");
        return Err(AppError::BadRequest(format!("file not found: {file}")));
    }

    let body = tokio::fs::read(&full_path)
        .await
        .map_err(|e| AppError::BadRequest(format!("cannot read {file}: {e}")))?;

    Ok(Upload {
        body: Bytes::from(body),
        file_name: full_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned()),
        ..Upload::default()
    })
}

async fn fetch_url(
    client: &reqwest::Client,
    raw: &str,
    options: &ServerOptions,
) -> Result<Upload, AppError> {
    let url = Url::parse(raw).map_err(|e| AppError::BadRequest(format!("invalid url: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::BadRequest(format!("unsupported url scheme: {}", url.scheme())));
    }
    if !is_allowed_origin(&url, &options.allowed_origins) {
        tracing::debug!(url = %url, "Remote image origin not allowed");
        return Err(AppError::BadRequest(format!("not allowed remote url origin: {}", url.host_str().unwrap_or_default())));
    }

    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| AppError::BadRequest(format!("error fetching remote image: {e}")))?;
    if !response.status().is_success() {
        return Err(AppError::BadRequest(format!(
            "error fetching remote image: status {}",
            response.status().as_u16()
        )));
    }

    if let (Some(max), Some(len)) = (options.max_allowed_size, response.content_length()) {
        if len > max as u64 {
            return Err(AppError::BadRequest(format!(
                "remote image too large: {len} bytes, limit {max}"
            )));
        }
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let body = read_limited(response, options.max_allowed_size).await?;

    Ok(Upload {
        body,
        file_name: url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .map(String::from),
        content_type,
        ..Upload::default()
    })
}

/// Read a remote body chunk by chunk, failing as soon as it passes `max` bytes.
///
/// `Content-Length` is optional (chunked transfers), so the limit is enforced
/// on what actually arrives.
async fn read_limited(mut response: reqwest::Response, max: Option<usize>) -> Result<Bytes, AppError> {
    let mut body = BytesMut::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| AppError::BadRequest(format!("error reading remote image: {e}")))?
    {
        if let Some(max) = max {
            if body.len() + chunk.len() > max {
                return Err(AppError::BadRequest(format!(
                    "remote image too large: more than {max} bytes"
                )));
            }
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

/// An empty allow-list admits every host. Entries are host names or URLs.
pub fn is_allowed_origin(url: &Url, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let Some(host) = url.host_str() else {
        return false;
    };

    allowed.iter().any(|origin| {
        let allowed_host = if origin.contains("://") {
            Url::parse(origin)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
        } else {
            Some(origin.trim().to_string())
        };
        allowed_host.is_some_and(|h| h.eq_ignore_ascii_case(host))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Local server answering every request with `chunks` chunks of ten bytes
    /// and no `Content-Length`.
    async fn serve_chunked(chunks: usize) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;

                    let mut response = String::from(
                        "HTTP/1.1 200 OK\r\n\
                         Content-Type: image/png\r\n\
                         Transfer-Encoding: chunked\r\n\
                         Connection: close\r\n\r\n",
                    );
                    for _ in 0..chunks {
                        response.push_str("a\r\n0123456789\r\n");
                    }
                    response.push_str("0\r\n\r\n");
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{addr}/remote/photo.png")
    }

    fn local_client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    fn url_source_options(max_allowed_size: Option<usize>) -> ServerOptions {
        ServerOptions {
            enable_url_source: true,
            max_allowed_size,
            ..ServerOptions::default()
        }
    }

    #[tokio::test]
    async fn test_chunked_remote_body_is_read() {
        let url = serve_chunked(3).await;
        let upload = fetch_url(&local_client(), &url, &url_source_options(Some(64)))
            .await
            .unwrap();
        assert_eq!(upload.body.len(), 30);
        assert_eq!(upload.file_name.as_deref(), Some("photo.png"));
        assert_eq!(upload.content_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_chunked_remote_body_over_limit_is_rejected() {
        let url = serve_chunked(3).await;
        let err = fetch_url(&local_client(), &url, &url_source_options(Some(16)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(msg) if msg.contains("too large")));
    }

    #[test]
    fn test_allowed_origins() {
        let url = Url::parse("https://cdn.example.com/a/photo.jpg").unwrap();
        assert!(is_allowed_origin(&url, &[]));
        assert!(is_allowed_origin(&url, &["cdn.example.com".to_string()]));
        assert!(is_allowed_origin(&url, &["https://CDN.example.com".to_string()]));
        assert!(!is_allowed_origin(&url, &["evil.example.com".to_string()]));
    }

    #[tokio::test]
    async fn test_raw_body_is_read() {
        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/resize")
            .body(Body::from("raw-bytes"))
            .unwrap();
        let upload = read_body(request).await.unwrap();
        assert_eq!(&upload.body[..], b"raw-bytes");
        assert!(upload.file_name.is_none());
    }

    #[tokio::test]
    async fn test_multipart_fields_are_read() {
        let body = "--XX\r\n\
            Content-Disposition: form-data; name=\"dest\"\r\n\r\n\
            thumbs\r\n\
            --XX\r\n\
            Content-Disposition: form-data; name=\"file\"; filename=\"cat.png\"\r\n\
            Content-Type: image/png\r\n\r\n\
            PNGDATA\r\n\
            --XX--\r\n";
        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/resize")
            .header(CONTENT_TYPE, "multipart/form-data; boundary=XX")
            .body(Body::from(body))
            .unwrap();

        let upload = read_body(request).await.unwrap();
        assert_eq!(upload.file_name.as_deref(), Some("cat.png"));
        assert_eq!(upload.content_type.as_deref(), Some("image/png"));
        assert_eq!(upload.dest.as_deref(), Some("thumbs"));
        assert_eq!(&upload.body[..], b"PNGDATA");
    }

    #[tokio::test]
    async fn test_mount_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let mount = dir.path().join("mount");
        std::fs::create_dir(&mount).unwrap();
        std::fs::write(mount.join("inside.png"), b"img").unwrap();
        std::fs::write(dir.path().join("secret.txt"), b"secret").unwrap();

        let upload = read_mount(&mount, "inside.png").await.unwrap();
        assert_eq!(upload.file_name.as_deref(), Some("inside.png"));

        assert!(matches!(
            read_mount(&mount, "../secret.txt").await,
            Err(AppError::BadRequest(_))
        ));
        assert!(read_mount(&mount, "missing.png").await.is_err());
    }

    #[tokio::test]
    async fn test_get_without_source_is_rejected() {
        let request = axum::http::Request::builder()
            .method(Method::GET)
            .uri("/resize?width=10")
            .body(Body::empty())
            .unwrap();
        let options = ServerOptions {
            enable_url_source: true,
            ..ServerOptions::default()
        };
        let err = read_image(request, &options, &reqwest::Client::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MissingImageSource));
    }
}
