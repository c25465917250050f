use std::path::PathBuf;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub bind_addr: String,
    pub search_url: String,
    pub media_root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Load configuration from the environment. `DATABASE_URL` is required,
/// everything else has a local-development default.
pub fn load() -> Result<Config> {
    let url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    Ok(Config {
        database: DatabaseConfig { url },
        bind_addr: std::env::var("BIND_ADDR").unwrap_or("0.0.0.0:3000".to_string()),
        search_url: std::env::var("SEARCH_URL").unwrap_or("http://localhost:9200".to_string()),
        media_root: std::env::var("MEDIA_ROOT")
            .unwrap_or("./uploads".to_string())
            .into(),
    })
}
