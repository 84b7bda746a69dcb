use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod auth;
mod config;
mod constants;
mod error;
mod handlers;
mod headers;
mod middleware;
mod models;
mod negotiate;
mod policy;
mod query;
mod rate_limiter;
mod signature;
mod source;
mod storage;
mod templates;
mod tls;
mod transform;
mod upload;

use config::Config;
use handlers::AppState;
use storage::S3Store;
use transform::ImageCrateBackend;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration
    let config = Config::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "imagegate=info,tower_http=info".into());
    if config.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    config.validate()?;

    tracing::info!(
        "{} Starting {} {}...",
        constants::EMOJI_PREFIX,
        constants::APP_NAME,
        constants::VERSION
    );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address {}:{}: {e}", config.host, config.port))?;
    let tls_files = config.cert.clone().zip(config.key_file.clone());

    let options = Arc::new(config.into_options()?);
    if let Some(mount) = &options.mount {
        tracing::info!("Mount directory: {:?}", mount);
    }

    let store = S3Store::connect(&options.storage).await;
    let client = reqwest::Client::builder()
        .timeout(options.read_timeout.max(std::time::Duration::from_secs(1)))
        .user_agent(headers::server_banner())
        .build()?;

    let state = AppState {
        options: options.clone(),
        store: Arc::new(store),
        backend: Arc::new(ImageCrateBackend),
        client,
        started_at: Instant::now(),
    };
    let app = middleware::build_router(state)?;

    match tls_files {
        Some((cert, key)) => {
            tls::install_crypto_provider();
            let tls_config = tls::load_tls_config(&cert, &key).await?;
            tracing::info!("Listening on: https://{}{}", addr, options.path_prefix);
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            tracing::info!("Listening on: http://{}{}", addr, options.path_prefix);
            axum_server::bind(addr).serve(app.into_make_service()).await?;
        }
    }

    Ok(())
}
