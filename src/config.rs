use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use base64::Engine;
use clap::Parser;
use jsonwebtoken::Algorithm;

use crate::constants;

#[derive(Parser, Debug, Clone)]
#[command(name = "imagegate")]
#[command(version)]
#[command(about = "🖼️ An HTTP image gateway that transforms uploads and republishes them to object storage")]
#[command(long_about = "\
imagegate - Image Transform & Publish Gateway

Accepts uploaded images, applies the requested transform and stores the result
in an S3-compatible bucket, answering with the public URL. Every security policy
(API key, JWT, URL signatures, rate limiting, endpoint deny-list, CORS) is
opt-in and composes with the others.

EXAMPLES:
    # Local MinIO with an API key
    imagegate --storage-endpoint minio.local:9000 \\
        --storage-access-key minio \\
        --storage-secret-key minio123 \\
        --storage-bucket public \\
        --key s3cr3t

    # Signed URLs, JWT and rate limiting
    imagegate --storage-endpoint s3.example.com \\
        --storage-access-key AKIA... --storage-secret-key ... \\
        --storage-bucket media --storage-use-ssl \\
        --enable-url-signature --url-signature-key <32+ chars> \\
        --jwt-secret supersecret --jwt-algorithm HS256 \\
        --concurrency 20 --burst 100

    # Using environment variables
    export IMAGEGATE_STORAGE_ENDPOINT=minio.local:9000
    export IMAGEGATE_STORAGE_BUCKET=public
    export IMAGEGATE_KEY=s3cr3t
    imagegate
")]
pub struct Config {
    /// Host/IP address to bind to
    #[arg(long, default_value = "0.0.0.0", env = "IMAGEGATE_HOST", value_name = "HOST")]
    pub host: String,

    /// Port to listen on
    #[arg(long, default_value = "8088", env = "IMAGEGATE_PORT", value_name = "PORT")]
    pub port: u16,

    /// Path prefix prepended to every route
    #[arg(long, default_value = "/", env = "IMAGEGATE_PATH_PREFIX", value_name = "PREFIX")]
    pub path_prefix: String,

    /// Path to TLS certificate file (PEM format). Plain HTTP when omitted.
    #[arg(long, env = "IMAGEGATE_CERT", value_name = "CERT_PATH")]
    pub cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM format)
    #[arg(long, env = "IMAGEGATE_KEY_FILE", value_name = "KEY_PATH")]
    pub key_file: Option<PathBuf>,

    /// Enable CORS support
    #[arg(long, env = "IMAGEGATE_CORS")]
    pub cors: bool,

    /// API key required on every non-public request (header `API-Key` or `key` param)
    #[arg(long, env = "IMAGEGATE_KEY", value_name = "API_KEY")]
    pub key: Option<String>,

    /// Serve GET requests from images under this directory (`file` param)
    #[arg(long, env = "IMAGEGATE_MOUNT", value_name = "DIR")]
    pub mount: Option<PathBuf>,

    /// Allow GET requests to fetch the source image from a remote URL (`url` param)
    #[arg(long, env = "IMAGEGATE_ENABLE_URL_SOURCE")]
    pub enable_url_source: bool,

    /// Restrict remote URL sources to these hosts (comma separated)
    #[arg(long, env = "IMAGEGATE_ALLOWED_ORIGINS", value_delimiter = ',', value_name = "HOSTS")]
    pub allowed_origins: Vec<String>,

    /// Require an HMAC-SHA256 URL signature in the `sign` parameter of image requests
    #[arg(long, env = "IMAGEGATE_ENABLE_URL_SIGNATURE")]
    pub enable_url_signature: bool,

    /// URL signature key (at least 32 characters)
    #[arg(long, env = "IMAGEGATE_URL_SIGNATURE_KEY", value_name = "KEY")]
    pub url_signature_key: Option<String>,

    /// JWT verification secret (or PEM public key for RS*/ES*/PS* algorithms)
    #[arg(long, env = "IMAGEGATE_JWT_SECRET", value_name = "SECRET")]
    pub jwt_secret: Option<String>,

    /// JWT verification secret, base64 encoded
    #[arg(long, env = "IMAGEGATE_JWT_SECRET_BASE64", value_name = "SECRET", conflicts_with = "jwt_secret")]
    pub jwt_secret_base64: Option<String>,

    /// JWT signing algorithm accepted by the server
    #[arg(long, default_value = "HS256", env = "IMAGEGATE_JWT_ALGORITHM", value_name = "ALG")]
    pub jwt_algorithm: String,

    /// Requests per second admitted per HTTP method (0 disables rate limiting)
    #[arg(long, default_value = "0", env = "IMAGEGATE_CONCURRENCY", value_name = "RPS")]
    pub concurrency: u32,

    /// Burst capacity of the rate limiter
    #[arg(long, default_value = "100", env = "IMAGEGATE_BURST", value_name = "N")]
    pub burst: u32,

    /// Cache TTL in seconds for GET responses (-1 disables cache headers, 0 forbids caching)
    #[arg(long, default_value = "-1", allow_negative_numbers = true, env = "IMAGEGATE_HTTP_CACHE_TTL", value_name = "SECONDS")]
    pub http_cache_ttl: i64,

    /// HTTP read timeout in seconds
    #[arg(long, default_value = "60", env = "IMAGEGATE_HTTP_READ_TIMEOUT", value_name = "SECONDS")]
    pub http_read_timeout: u64,

    /// HTTP write timeout in seconds
    #[arg(long, default_value = "60", env = "IMAGEGATE_HTTP_WRITE_TIMEOUT", value_name = "SECONDS")]
    pub http_write_timeout: u64,

    /// Maximum accepted request body in bytes (0 = unlimited)
    #[arg(long, default_value = "0", env = "IMAGEGATE_MAX_ALLOWED_SIZE", value_name = "BYTES")]
    pub max_allowed_size: usize,

    /// Endpoint names to disable (comma separated), e.g. `crop,rotate`
    #[arg(long, env = "IMAGEGATE_DISABLE_ENDPOINTS", value_delimiter = ',', value_name = "NAMES")]
    pub disable_endpoints: Vec<String>,

    /// Object storage endpoint, `host[:port]` without scheme
    #[arg(long, env = "IMAGEGATE_STORAGE_ENDPOINT", value_name = "HOST")]
    pub storage_endpoint: String,

    /// Object storage access key
    #[arg(long, env = "IMAGEGATE_STORAGE_ACCESS_KEY", value_name = "ACCESS_KEY")]
    pub storage_access_key: String,

    /// Object storage secret key
    #[arg(long, env = "IMAGEGATE_STORAGE_SECRET_KEY", value_name = "SECRET_KEY")]
    pub storage_secret_key: String,

    /// Bucket receiving the derived artifacts
    #[arg(long, env = "IMAGEGATE_STORAGE_BUCKET", value_name = "BUCKET")]
    pub storage_bucket: String,

    /// Object storage region
    #[arg(long, default_value = "us-east-1", env = "IMAGEGATE_STORAGE_REGION", value_name = "REGION")]
    pub storage_region: String,

    /// Talk to the storage endpoint over HTTPS
    #[arg(long, env = "IMAGEGATE_STORAGE_USE_SSL")]
    pub storage_use_ssl: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "IMAGEGATE_LOG_JSON")]
    pub log_json: bool,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        match (&self.cert, &self.key_file) {
            (Some(cert), Some(key)) => {
                if !cert.exists() {
                    anyhow::bail!("Certificate file does not exist: {:?}", cert);
                }
                if !key.exists() {
                    anyhow::bail!("Private key file does not exist: {:?}", key);
                }
            }
            (None, None) => {}
            _ => anyhow::bail!("Both --cert and --key-file must be provided to enable TLS"),
        }

        if let Some(mount) = &self.mount {
            if !mount.is_dir() {
                anyhow::bail!("Mount path is not a directory: {:?}", mount);
            }
        }

        if self.enable_url_signature {
            match &self.url_signature_key {
                None => anyhow::bail!("URL signature key is required when URL signatures are enabled"),
                Some(key) if key.len() < constants::MIN_URL_SIGNATURE_KEY_LEN => anyhow::bail!(
                    "URL signature key must be a minimum of {} characters",
                    constants::MIN_URL_SIGNATURE_KEY_LEN
                ),
                Some(_) => {}
            }
        }

        if self.http_cache_ttl > constants::MAX_HTTP_CACHE_TTL {
            anyhow::bail!(
                "HTTP cache TTL must not exceed {} seconds",
                constants::MAX_HTTP_CACHE_TTL
            );
        }

        if self.concurrency > 0 && self.burst == 0 {
            anyhow::bail!("Burst must be greater than zero when rate limiting is enabled");
        }

        if self.storage_endpoint.is_empty() {
            anyhow::bail!("Storage endpoint cannot be empty");
        }

        if self.storage_bucket.is_empty() {
            anyhow::bail!("Storage bucket cannot be empty");
        }

        Algorithm::from_str(&self.jwt_algorithm)
            .with_context(|| format!("Unsupported JWT algorithm: {}", self.jwt_algorithm))?;

        Ok(())
    }

    /// Freeze the parsed arguments into the immutable runtime options.
    pub fn into_options(self) -> anyhow::Result<ServerOptions> {
        let jwt_secret = match (self.jwt_secret, self.jwt_secret_base64) {
            (Some(raw), _) => Some(raw.into_bytes()),
            (None, Some(encoded)) => Some(
                base64::prelude::BASE64_STANDARD
                    .decode(encoded.trim())
                    .context("JWT secret is not valid base64")?,
            ),
            (None, None) => None,
        };

        let jwt = match jwt_secret {
            Some(secret) if !secret.is_empty() => Some(JwtOptions {
                secret,
                algorithm: Algorithm::from_str(&self.jwt_algorithm)
                    .with_context(|| format!("Unsupported JWT algorithm: {}", self.jwt_algorithm))?,
            }),
            _ => None,
        };

        let rate_limit = (self.concurrency > 0).then_some(RateQuota {
            per_second: self.concurrency,
            burst: self.burst,
        });

        Ok(ServerOptions {
            path_prefix: normalize_prefix(&self.path_prefix),
            api_key: self.key.filter(|k| !k.is_empty()),
            jwt,
            url_signature_key: if self.enable_url_signature {
                self.url_signature_key
            } else {
                None
            },
            rate_limit,
            http_cache_ttl: u64::try_from(self.http_cache_ttl).ok(),
            endpoints: Endpoints::new(self.disable_endpoints),
            cors: self.cors,
            mount: self.mount,
            enable_url_source: self.enable_url_source,
            allowed_origins: self
                .allowed_origins
                .into_iter()
                .map(|o| o.trim().to_lowercase())
                .filter(|o| !o.is_empty())
                .collect(),
            max_allowed_size: (self.max_allowed_size > 0).then_some(self.max_allowed_size),
            read_timeout: Duration::from_secs(self.http_read_timeout),
            write_timeout: Duration::from_secs(self.http_write_timeout),
            storage: StorageOptions {
                endpoint: self.storage_endpoint,
                access_key: self.storage_access_key,
                secret_key: self.storage_secret_key,
                bucket: self.storage_bucket,
                region: self.storage_region,
                use_ssl: self.storage_use_ssl,
            },
        })
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Immutable per-process configuration snapshot.
///
/// Built once at startup and shared behind an `Arc`. An `Option` field that is
/// `None` means the corresponding policy is disabled and its layer is omitted.
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    /// Normalized prefix: empty, or `/segment[/segment..]` without a trailing slash
    pub path_prefix: String,
    pub api_key: Option<String>,
    pub jwt: Option<JwtOptions>,
    /// Present iff URL signatures are enabled
    pub url_signature_key: Option<String>,
    pub rate_limit: Option<RateQuota>,
    /// Present iff cache headers are enabled; 0 forbids caching
    pub http_cache_ttl: Option<u64>,
    pub endpoints: Endpoints,
    pub cors: bool,
    pub mount: Option<PathBuf>,
    pub enable_url_source: bool,
    pub allowed_origins: Vec<String>,
    pub max_allowed_size: Option<usize>,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub storage: StorageOptions,
}

impl ServerOptions {
    /// Strip the configured prefix from a request path.
    pub fn route_path<'a>(&self, path: &'a str) -> &'a str {
        match path.strip_prefix(self.path_prefix.as_str()) {
            Some("") => "/",
            Some(rest) if rest.starts_with('/') => rest,
            _ => path,
        }
    }

    /// Public paths are reachable via GET without authorization.
    pub fn is_public_path(&self, path: &str) -> bool {
        constants::PUBLIC_PATHS.contains(&self.route_path(path))
    }
}

#[derive(Debug, Clone)]
pub struct JwtOptions {
    pub secret: Vec<u8>,
    pub algorithm: Algorithm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateQuota {
    pub per_second: u32,
    pub burst: u32,
}

#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    /// `host[:port]` without scheme
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
    pub use_ssl: bool,
}

/// Endpoint names to deny, matched against the last path segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoints(Vec<String>);

impl Endpoints {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list: Vec<String> = Vec::new();
        for name in names {
            let name = name.into().trim().trim_matches('/').to_string();
            if !name.is_empty() && !list.contains(&name) {
                list.push(name);
            }
        }
        Self(list)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the endpoint addressed by `path` is allowed.
    pub fn is_allowed(&self, path: &str) -> bool {
        let endpoint = path.rsplit('/').next().unwrap_or_default();
        !self.0.iter().any(|name| name == endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Vec<&'static str> {
        vec![
            "imagegate",
            "--storage-endpoint",
            "minio.local:9000",
            "--storage-access-key",
            "minio",
            "--storage-secret-key",
            "minio123",
            "--storage-bucket",
            "public",
        ]
    }

    #[test]
    fn test_defaults_disable_every_policy() {
        let config = Config::try_parse_from(base_args()).unwrap();
        config.validate().unwrap();
        let options = config.into_options().unwrap();

        assert!(options.api_key.is_none());
        assert!(options.jwt.is_none());
        assert!(options.url_signature_key.is_none());
        assert!(options.rate_limit.is_none());
        assert!(options.http_cache_ttl.is_none());
        assert!(options.endpoints.is_empty());
        assert!(!options.cors);
        assert_eq!(options.path_prefix, "");
    }

    #[test]
    fn test_policies_enabled_from_args() {
        let mut args = base_args();
        args.extend([
            "--key",
            "s3cr3t",
            "--jwt-secret",
            "jwtsecret",
            "--jwt-algorithm",
            "HS512",
            "--concurrency",
            "10",
            "--burst",
            "5",
            "--http-cache-ttl",
            "0",
            "--disable-endpoints",
            "crop,/rotate",
            "--path-prefix",
            "api/",
        ]);
        let config = Config::try_parse_from(args).unwrap();
        config.validate().unwrap();
        let options = config.into_options().unwrap();

        assert_eq!(options.api_key.as_deref(), Some("s3cr3t"));
        let jwt = options.jwt.unwrap();
        assert_eq!(jwt.algorithm, Algorithm::HS512);
        assert_eq!(jwt.secret, b"jwtsecret");
        assert_eq!(options.rate_limit, Some(RateQuota { per_second: 10, burst: 5 }));
        assert_eq!(options.http_cache_ttl, Some(0));
        assert_eq!(options.endpoints, Endpoints::new(["crop", "rotate"]));
        assert_eq!(options.path_prefix, "/api");
    }

    #[test]
    fn test_oversized_cache_ttl_is_rejected() {
        let mut args = base_args();
        args.extend(["--http-cache-ttl", "10000000000000"]);
        let config = Config::try_parse_from(args).unwrap();
        assert!(config.validate().is_err());

        let mut args = base_args();
        args.extend(["--http-cache-ttl", "31536000"]);
        Config::try_parse_from(args).unwrap().validate().unwrap();
    }

    #[test]
    fn test_base64_jwt_secret_is_decoded() {
        let mut args = base_args();
        args.extend(["--jwt-secret-base64", "c2VjcmV0"]);
        let options = Config::try_parse_from(args).unwrap().into_options().unwrap();
        assert_eq!(options.jwt.unwrap().secret, b"secret");
    }

    #[test]
    fn test_short_url_signature_key_is_rejected() {
        let mut args = base_args();
        args.extend(["--enable-url-signature", "--url-signature-key", "short"]);
        let config = Config::try_parse_from(args).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_url_signature_key_ignored_unless_enabled() {
        let mut args = base_args();
        args.extend(["--url-signature-key", "0123456789abcdef0123456789abcdef"]);
        let options = Config::try_parse_from(args).unwrap().into_options().unwrap();
        assert!(options.url_signature_key.is_none());
    }

    #[test]
    fn test_unknown_jwt_algorithm_is_rejected() {
        let mut args = base_args();
        args.extend(["--jwt-algorithm", "none"]);
        let config = Config::try_parse_from(args).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoints_match_last_segment() {
        let endpoints = Endpoints::new(["crop", "info"]);
        assert!(!endpoints.is_allowed("/crop"));
        assert!(!endpoints.is_allowed("/api/v1/info"));
        assert!(endpoints.is_allowed("/resize"));
        assert!(endpoints.is_allowed("/crop/"));
        assert!(Endpoints::default().is_allowed("/crop"));
    }

    #[test]
    fn test_public_paths_respect_prefix() {
        let options = ServerOptions {
            path_prefix: "/api".to_string(),
            ..Default::default()
        };
        assert!(options.is_public_path("/api"));
        assert!(options.is_public_path("/api/health"));
        assert!(options.is_public_path("/api/form"));
        assert!(!options.is_public_path("/api/resize"));

        let bare = ServerOptions::default();
        assert!(bare.is_public_path("/"));
        assert!(bare.is_public_path("/health"));
        assert!(!bare.is_public_path("/resize"));
    }
}
