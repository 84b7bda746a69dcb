use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

/// Application error types
///
/// Every policy layer and handler replies through this type, so the wire format
/// (`{ "message", "status" }`) and the status taxonomy live in one place.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found")]
    NotFound,
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("Not implemented endpoint")]
    NotImplemented,
    #[error("Invalid or missing API key")]
    InvalidApiKey,
    #[error("Invalid or missing JWT")]
    InvalidToken,
    #[error("Invalid URL signature")]
    InvalidSignature,
    #[error("URL signature mismatch")]
    SignatureMismatch,
    #[error("Too many requests")]
    TooManyRequests { retry_after_secs: u64 },
    #[error("Unsupported media type")]
    UnsupportedMedia,
    #[error("Unsupported output image format")]
    OutputFormat,
    #[error("Empty or unreadable image")]
    EmptyBody,
    #[error("Cannot process the image due to missing or invalid image source")]
    MissingImageSource,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    status: u16,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            AppError::InvalidApiKey
            | AppError::InvalidToken
            | AppError::InvalidSignature
            | AppError::SignatureMismatch => StatusCode::UNAUTHORIZED,
            AppError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::UnsupportedMedia => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::OutputFormat
            | AppError::EmptyBody
            | AppError::MissingImageSource
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message exposed to the caller.
    ///
    /// Both signature failures share one message so the reply does not reveal
    /// whether decoding or the digest comparison failed.
    fn public_message(&self) -> String {
        match self {
            AppError::InvalidSignature | AppError::SignatureMismatch => {
                "Invalid URL signature".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "Request rejected");
        }

        let body = ErrorBody {
            message: self.public_message(),
            status: status.as_u16(),
        };
        let mut response = (status, Json(body)).into_response();

        if let AppError::TooManyRequests { retry_after_secs } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}
