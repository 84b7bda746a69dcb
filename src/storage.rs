//! Object storage behind the [`ObjectStore`] seam.

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;

use crate::config::StorageOptions;
use crate::error::AppError;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key`, replacing any existing object.
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), AppError>;

    /// Public URL under which `key` is served
    fn public_url(&self, key: &str) -> String;
}

/// S3-compatible store (MinIO, AWS, ...) addressed path-style.
pub struct S3Store {
    client: aws_sdk_s3::Client,
    endpoint: String,
    bucket: String,
}

impl S3Store {
    pub async fn connect(options: &StorageOptions) -> Self {
        let scheme = if options.use_ssl { "https" } else { "http" };
        let credentials = Credentials::new(
            options.access_key.clone(),
            options.secret_key.clone(),
            None,
            None,
            "imagegate",
        );

        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .endpoint_url(format!("{scheme}://{}", options.endpoint))
            .region(aws_config::Region::new(options.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        let config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();

        tracing::info!(
            endpoint = %options.endpoint,
            bucket = %options.bucket,
            tls = options.use_ssl,
            "Object storage client configured"
        );

        Self {
            client: aws_sdk_s3::Client::from_conf(config),
            endpoint: options.endpoint.clone(),
            bucket: options.bucket.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), AppError> {
        let size = body.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(key, error = %e, "Storage PUT failed");
                AppError::Internal(format!("Error uploading {key} to storage"))
            })?;

        tracing::info!(key, size, content_type, "Stored object");
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        public_url(&self.endpoint, &self.bucket, key)
    }
}

pub fn public_url(endpoint: &str, bucket: &str, key: &str) -> String {
    format!("https://{endpoint}/{bucket}/{key}")
}
