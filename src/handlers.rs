use std::sync::Arc;
use std::time::Instant;

use askama::Template;
use axum::{
    extract::{Request, State},
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderValue,
    },
    response::{Html, IntoResponse, Json, Response},
};
use rand::{distributions::Alphanumeric, Rng};

use crate::config::ServerOptions;
use crate::constants::{self, DEFAULT_VIDEO_DEST, VIDEO_SUFFIX_LEN};
use crate::error::AppError;
use crate::models::{FormOperation, HealthStats, Versions};
use crate::query::QueryPairs;
use crate::source;
use crate::storage::ObjectStore;
use crate::templates::FormTemplate;
use crate::transform::{ImageBackend, Operation};
use crate::upload;

#[derive(Clone)]
pub struct AppState {
    pub options: Arc<ServerOptions>,
    pub store: Arc<dyn ObjectStore>,
    pub backend: Arc<dyn ImageBackend>,
    /// Client for remote image sources
    pub client: reqwest::Client,
    pub started_at: Instant,
}

/// Handler for the root path - reports name, version and image backend
pub async fn index_handler(State(state): State<AppState>) -> Json<Versions> {
    Json(Versions {
        name: constants::APP_NAME.to_string(),
        version: constants::VERSION.to_string(),
        backend: state.backend.name().to_string(),
    })
}

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthStats> {
    Json(HealthStats::new(state.started_at.elapsed().as_secs()))
}

const FORM_OPERATIONS: &[FormOperation] = &[
    FormOperation { title: "Resize", endpoint: "resize", args: "width=300&height=200&type=jpeg" },
    FormOperation { title: "Force resize", endpoint: "resize", args: "width=300&height=200&force=true" },
    FormOperation { title: "Crop", endpoint: "crop", args: "width=300&quality=95" },
    FormOperation { title: "SmartCrop", endpoint: "crop", args: "width=300&height=260&quality=95&gravity=smart" },
    FormOperation { title: "Extract", endpoint: "extract", args: "top=100&left=100&areawidth=300&areaheight=150" },
    FormOperation { title: "Enlarge", endpoint: "enlarge", args: "width=1440&height=900&quality=95" },
    FormOperation { title: "Rotate", endpoint: "rotate", args: "rotate=180" },
    FormOperation { title: "Flip", endpoint: "flip", args: "" },
    FormOperation { title: "Flop", endpoint: "flop", args: "" },
    FormOperation { title: "Thumbnail", endpoint: "thumbnail", args: "width=100" },
    FormOperation { title: "Zoom", endpoint: "zoom", args: "factor=2&areawidth=300&areaheight=200&top=80&left=80" },
    FormOperation { title: "Color space (black & white)", endpoint: "resize", args: "width=400&height=300&colorspace=bw" },
    FormOperation { title: "Convert format", endpoint: "convert", args: "type=png" },
    FormOperation { title: "Auto format (Accept header)", endpoint: "convert", args: "type=auto" },
    FormOperation { title: "Image metadata", endpoint: "info", args: "" },
    FormOperation { title: "Gaussian blur", endpoint: "blur", args: "sigma=15.0&minampl=0.2" },
    FormOperation {
        title: "Pipeline (crop then convert)",
        endpoint: "pipeline",
        args: "operations=%5B%7B%22operation%22:%22crop%22,%22params%22:%7B%22width%22:300,%22height%22:260%7D%7D,%7B%22operation%22:%22convert%22,%22params%22:%7B%22type%22:%22webp%22%7D%7D%5D",
    },
];

/// Handler for the HTML test form
pub async fn form_handler(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    let template = FormTemplate {
        operations: FORM_OPERATIONS,
        path_prefix: &state.options.path_prefix,
        app_name: constants::APP_NAME,
        version: constants::VERSION,
        emoji_prefix: constants::EMOJI_PREFIX,
    };
    let body = template
        .render()
        .map_err(|e| AppError::Internal(format!("template error: {e}")))?;
    Ok(Html(body))
}

/// Handler shared by every image operation route
pub async fn image_handler(
    state: AppState,
    operation: Operation,
    request: Request,
) -> Result<Response, AppError> {
    let query = QueryPairs::parse(request.uri().query());
    let accept = request
        .headers()
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let upload = source::read_image(request, &state.options, &state.client).await?;
    upload::ingest_image(&state, operation, upload, &query, accept.as_deref()).await
}

/// Handler for video uploads: stored as sent under a randomized name
pub async fn video_handler(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, AppError> {
    let query = QueryPairs::parse(request.uri().query());
    let upload = source::read_body(request).await?;

    let Some(file_name) = upload.file_name.as_deref().filter(|n| !n.is_empty()) else {
        return Err(AppError::BadRequest(format!(
            "missing multipart field {:?}",
            constants::FORM_FIELD_NAME
        )));
    };
    if upload.body.is_empty() {
        return Err(AppError::EmptyBody);
    }

    let content_type = upload
        .content_type
        .clone()
        .unwrap_or_else(|| mime_guess::from_path(file_name).first_or_octet_stream().to_string());

    let dest = upload
        .dest
        .as_deref()
        .or_else(|| query.get("dest"))
        .unwrap_or(DEFAULT_VIDEO_DEST);
    let ext = upload
        .type_name
        .as_deref()
        .or_else(|| query.get("type"))
        .filter(|t| !t.is_empty());
    let key = video_filename(file_name, dest, &random_suffix(), ext);

    let size = upload.body.len();
    state.store.put(&key, upload.body, &content_type).await?;
    tracing::info!(key = %key, content_type = %content_type, size, "Stored video");

    let mut response = state.store.public_url(&key).into_response();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
    Ok(response)
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .filter(u8::is_ascii_alphabetic)
        .take(VIDEO_SUFFIX_LEN)
        .map(char::from)
        .collect()
}

fn video_filename(original: &str, dest: &str, suffix: &str, ext: Option<&str>) -> String {
    let base = original.rsplit('/').next().unwrap_or(original);
    let (stem, old_ext) = match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (base, None),
    };

    let dest = dest.trim_matches('/');
    let folder = if dest.is_empty() {
        String::new()
    } else {
        format!("{dest}/")
    };

    match ext.or(old_ext) {
        Some(ext) => format!("{folder}{stem}-{suffix}.{ext}"),
        None => format!("{folder}{stem}-{suffix}"),
    }
}

pub async fn not_found_handler() -> AppError {
    AppError::NotFound
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_suffix_is_letters() {
        let suffix = random_suffix();
        assert_eq!(suffix.len(), VIDEO_SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_alphabetic()));
    }

    #[test]
    fn test_video_filename() {
        assert_eq!(
            video_filename("clip.mp4", "videos", "AbCdEf", None),
            "videos/clip-AbCdEf.mp4"
        );
        assert_eq!(video_filename("clip.mp4", "", "AbCdEf", Some("webm")), "clip-AbCdEf.webm");
        assert_eq!(video_filename("clip", "/v/", "AbCdEf", None), "v/clip-AbCdEf");
    }

    #[test]
    fn test_form_operations_target_known_routes() {
        for op in FORM_OPERATIONS {
            assert!(Operation::from_name(op.endpoint).is_some(), "{}", op.endpoint);
        }
    }
}
