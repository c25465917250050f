use anyhow::{Context, Result};
use axum::Router;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

use crate::core::{app_state::AppState, config::Config};

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

pub fn init_env() {
    // Missing .env is fine in containerized deployments.
    dotenvy::dotenv().ok();
}

/// Build the application state, attach the static upload directory and
/// request tracing, and serve until shutdown.
pub async fn bootstrap(service_name: &str, app: Router<AppState>, config: &Config) -> Result<()> {
    let state = AppState::init(config).await?;

    std::fs::create_dir_all(&config.media_root).context("Failed to create media root")?;

    let app = app
        .merge(crate::graphql::routes(state.db_pool.clone()))
        .nest_service("/uploads", ServeDir::new(&config.media_root))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!("{} listening on {}", service_name, config.bind_addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
