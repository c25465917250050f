use std::path::PathBuf;

use anyhow::Result;

use crate::{
    core::{config::Config, db},
    search::SearchClient,
};

#[derive(Clone)]
pub struct AppState {
    pub db_pool: db::DbPool,
    pub http_client: reqwest::Client,
    pub search: SearchClient,
    pub media_root: PathBuf,
}

impl AppState {
    pub async fn init(config: &Config) -> Result<Self> {
        let db_pool = db::create_pool(&config.database.url).await?;
        let http_client = reqwest::Client::new();
        let search = SearchClient::new(http_client.clone(), config.search_url.clone());

        Ok(Self {
            db_pool,
            http_client,
            search,
            media_root: config.media_root.clone(),
        })
    }
}
