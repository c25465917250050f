//! Product search, delegated to an external document index.
//!
//! The catalog keeps the index in sync on every product mutation and proxies
//! search queries through the backend rather than exposing the index to the
//! storefront directly. The index speaks a JSON-over-HTTP API, so the client
//! is a thin layer over the shared `reqwest` client.

pub mod query;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::core::app_error::AppError;

pub const PRODUCT_INDEX: &str = "products";

/// The document shape held in the index, one per product.
#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct ProductDocument {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub price: f32,
    pub category_ids: Vec<i32>,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Deserialize)]
struct SearchHits {
    hits: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(rename = "_source")]
    source: ProductDocument,
}

#[derive(Clone)]
pub struct SearchClient {
    http: reqwest::Client,
    base_url: String,
}

impl SearchClient {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }

    /// Create or overwrite the document for a product.
    pub async fn index_product(&self, doc: &ProductDocument) -> Result<()> {
        self.http
            .put(format!("{}/{}/_doc/{}", self.base_url, PRODUCT_INDEX, doc.id))
            .json(doc)
            .send()
            .await
            .context("Failed to reach search index")?
            .error_for_status()
            .context("Search index rejected document")?;
        Ok(())
    }

    /// Remove a product's document. A missing document is not an error; the
    /// index may simply never have seen the product.
    pub async fn delete_product(&self, product_id: i32) -> Result<()> {
        let res = self
            .http
            .delete(format!(
                "{}/{}/_doc/{}",
                self.base_url, PRODUCT_INDEX, product_id
            ))
            .send()
            .await
            .context("Failed to reach search index")?;

        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        res.error_for_status().context("Search index delete failed")?;
        Ok(())
    }

    /// Run a `_search` query and return the matching documents.
    pub async fn search_products(&self, body: &Value) -> Result<Vec<ProductDocument>, AppError> {
        let res: SearchResponse = self
            .http
            .post(format!("{}/{}/_search", self.base_url, PRODUCT_INDEX))
            .json(body)
            .send()
            .await
            .map_err(|_| AppError::ServiceUnreachable("SearchIndex".into()))?
            .json()
            .await
            .context("Failed to parse search response")?;

        Ok(res.hits.hits.into_iter().map(|hit| hit.source).collect())
    }
}
