//! GraphQL read surface over the catalog.
//!
//! Storefront read queries can fetch products here; every mutation stays on
//! the REST endpoints. The schema carries the DB pool in its context, so the
//! router is assembled once the pool exists.

use std::collections::HashMap;

use async_graphql::{
    Context, EmptyMutation, EmptySubscription, Object, Result as GqlResult, Schema, SimpleObject,
};
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::{Extension, Router, routing::post};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl};
use diesel_async::RunQueryDsl;

use crate::{
    core::{app_state::AppState, db::DbPool},
    models::ProductEntity,
    schema::{product_categories, products},
};

/// The product shape exposed to read queries.
#[derive(SimpleObject)]
pub struct Product {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub price: f32,
    pub is_active: bool,
    pub category_ids: Vec<i32>,
}

impl Product {
    fn from_entity(entity: ProductEntity, category_ids: Vec<i32>) -> Self {
        Self {
            id: entity.id,
            name: entity.name,
            description: entity.description,
            price: entity.price,
            is_active: entity.is_active,
            category_ids,
        }
    }
}

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// Products, newest first.
    async fn products(
        &self,
        ctx: &Context<'_>,
        #[graphql(default = 20)] limit: i32,
        #[graphql(default = 0)] offset: i32,
    ) -> GqlResult<Vec<Product>> {
        let pool = ctx.data::<DbPool>()?;
        let conn = &mut pool.get().await?;

        let listing: Vec<ProductEntity> = products::table
            .order_by(products::created_at.desc())
            .limit(i64::from(limit.clamp(1, 100)))
            .offset(i64::from(offset.max(0)))
            .get_results(conn)
            .await?;

        let ids: Vec<i32> = listing.iter().map(|product| product.id).collect();
        let links: Vec<(i32, i32)> = product_categories::table
            .filter(product_categories::product_id.eq_any(&ids))
            .select((
                product_categories::product_id,
                product_categories::category_id,
            ))
            .get_results(conn)
            .await?;

        let mut by_product: HashMap<i32, Vec<i32>> = HashMap::new();
        for (product_id, category_id) in links {
            by_product.entry(product_id).or_default().push(category_id);
        }

        Ok(listing
            .into_iter()
            .map(|product| {
                let category_ids = by_product.remove(&product.id).unwrap_or_default();
                Product::from_entity(product, category_ids)
            })
            .collect())
    }

    /// One product by id, or null when absent.
    async fn product(&self, ctx: &Context<'_>, id: i32) -> GqlResult<Option<Product>> {
        let pool = ctx.data::<DbPool>()?;
        let conn = &mut pool.get().await?;

        let entity: Option<ProductEntity> = products::table
            .find(id)
            .get_result(conn)
            .await
            .optional()?;
        let Some(entity) = entity else {
            return Ok(None);
        };

        let category_ids: Vec<i32> = product_categories::table
            .filter(product_categories::product_id.eq(entity.id))
            .select(product_categories::category_id)
            .get_results(conn)
            .await?;

        Ok(Some(Product::from_entity(entity, category_ids)))
    }
}

pub type CatalogSchema = Schema<QueryRoot, EmptyMutation, EmptySubscription>;

pub fn build_schema(db_pool: DbPool) -> CatalogSchema {
    Schema::build(QueryRoot, EmptyMutation, EmptySubscription)
        .data(db_pool)
        .finish()
}

/// `POST /graphql`, mounted next to the REST routes at bootstrap.
pub fn routes(db_pool: DbPool) -> Router<AppState> {
    Router::new()
        .route("/graphql", post(graphql_handler))
        .layer(Extension(build_schema(db_pool)))
}

async fn graphql_handler(
    Extension(schema): Extension<CatalogSchema>,
    req: GraphQLRequest,
) -> GraphQLResponse {
    CatalogSchema::execute(&schema, req.into_inner()).await.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_exposes_product_read_queries() {
        let schema = Schema::build(QueryRoot, EmptyMutation, EmptySubscription).finish();
        let sdl = schema.sdl();
        assert!(sdl.contains("type Product"));
        assert!(sdl.contains("products("));
        assert!(sdl.contains("product("));
        assert!(sdl.contains("categoryIds"));
    }

    #[test]
    fn schema_is_read_only() {
        let schema = Schema::build(QueryRoot, EmptyMutation, EmptySubscription).finish();
        assert!(!schema.sdl().contains("type Mutation"));
    }
}
