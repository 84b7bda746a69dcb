use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use std::path::Path;

/// Select the aws-lc-rs crypto provider for rustls.
///
/// Must run before any TLS configuration is built.
pub fn install_crypto_provider() {
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }
}

/// Load TLS configuration from certificate and key files
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig> {
    tracing::info!("Loading TLS certificates...");
    tracing::info!("  Certificate: {:?}", cert_path);
    tracing::info!("  Private key: {:?}", key_path);

    let config = RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .with_context(|| {
            format!(
                "Failed to load TLS configuration from {} and {}",
                cert_path.display(),
                key_path.display()
            )
        })?;

    tracing::info!("TLS configuration loaded successfully");

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_certificate_files_fail() {
        install_crypto_provider();
        let dir = tempfile::tempdir().unwrap();
        let err = load_tls_config(&dir.path().join("cert.pem"), &dir.path().join("key.pem"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to load TLS configuration"));
    }
}
