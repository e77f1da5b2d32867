//! Homeguard control plane server
//!
//! Reads its configuration from the TOML file named by `HOMEGUARD_CONFIG`
//! (default `homeguard.toml`). A missing file means the appliance has not
//! been installed yet: the server starts in first-run mode and writes the
//! file once the first user is created.

use homeguard_core::{AppConfig, FileConfigModifier, LoggingConfig, SystemClock};
use homeguard_web::auth::SledBackend;
use homeguard_web::{create_router, state::AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_CONFIG_PATH: &str = "homeguard.toml";

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "homeguard_web={level},tower_http={level},audit={level}",
            level = logging.level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json_format {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_file(logging.include_location)
                    .with_line_number(logging.include_location),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_file(logging.include_location)
                    .with_line_number(logging.include_location),
            )
            .init();
    }
}

fn load_config(path: &PathBuf) -> anyhow::Result<(AppConfig, bool)> {
    let first_run = !path.exists();
    let config = if first_run {
        AppConfig::from_env()?
    } else {
        AppConfig::from_file(path)?.with_env_override()?
    };
    config.validate()?;

    Ok((config, first_run))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = PathBuf::from(
        std::env::var("HOMEGUARD_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
    );
    let (config, first_run) = load_config(&config_path)?;

    init_tracing(&config.logging);

    if let Some(parent) = config.auth.sessions_db.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let backend = SledBackend::open(&config.auth.sessions_db)?;
    let modifier = Arc::new(FileConfigModifier::new(&config_path, config.clone()));

    let addr = format!("{}:{}", config.server.host, config.server.port);

    // Create application state
    let state = Arc::new(AppState::new(
        config,
        modifier,
        Box::new(backend),
        Arc::new(SystemClock),
        first_run,
    )?);

    if first_run {
        tracing::warn!(
            config = %config_path.display(),
            "No configuration file, starting in first-run mode"
        );
    }

    let app = create_router(state.clone());

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Homeguard control plane starting on http://{}", addr);
    tracing::info!("OpenAPI document at http://{}/control/openapi.json", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    state.auth.close()?;
    tracing::info!("Sessions flushed, bye");

    Ok(())
}
