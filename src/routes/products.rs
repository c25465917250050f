use anyhow::Context;
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;

use crate::{
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware::{self, AuthUser, Role},
    },
    domain::VendorStatus,
    models::{
        CreateProductEntity, ProductCategoryEntity, ProductEntity, UpdateProductEntity,
        VendorEntity,
    },
    schema::{product_categories, products, vendors},
    search::{
        ProductDocument,
        query::{ProductSearchParams, build_product_query},
    },
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .nest(
            "/products",
            OpenApiRouter::new()
                .routes(utoipa_axum::routes!(get_products))
                .routes(utoipa_axum::routes!(search_products))
                .routes(utoipa_axum::routes!(get_product)),
        )
        .nest(
            "/products",
            OpenApiRouter::new()
                .routes(utoipa_axum::routes!(create_product))
                .routes(utoipa_axum::routes!(update_product))
                .routes(utoipa_axum::routes!(delete_product))
                .route_layer(axum::middleware::from_fn(
                    middleware::customers_authorization,
                )),
        )
}

/// Resolve who may write to the catalog: admins freely, vendors only once
/// approved and only onto their own vendor id.
async fn catalog_writer_vendor_id(
    conn: &mut AsyncPgConnection,
    user: AuthUser,
) -> Result<Option<i32>, AppError> {
    match user.role {
        Role::Admin => Ok(None),
        Role::Vendor => {
            let vendor: VendorEntity = vendors::table
                .filter(vendors::user_id.eq(user.id))
                .first(conn)
                .await
                .map_err(|_| {
                    AppError::ForbiddenResource("No vendor account for this user".into())
                })?;
            if VendorStatus::parse(&vendor.status) != Some(VendorStatus::Approved) {
                return Err(AppError::ForbiddenResource(
                    "Vendor is not approved to list products".into(),
                ));
            }
            Ok(Some(vendor.id))
        }
        Role::Customer => Err(AppError::ForbiddenResource(
            "Only admins and approved vendors may manage products".into(),
        )),
    }
}

async fn category_ids_of(
    conn: &mut AsyncPgConnection,
    product_id: i32,
) -> Result<Vec<i32>, AppError> {
    let ids = product_categories::table
        .filter(product_categories::product_id.eq(product_id))
        .select(product_categories::category_id)
        .get_results(conn)
        .await
        .context("Failed to get product categories")?;
    Ok(ids)
}

/// Push the current product state to the search index. Index failures are
/// logged and swallowed; the database remains the source of truth.
async fn sync_index(state: &AppState, product: &ProductEntity, category_ids: Vec<i32>) {
    let doc = ProductDocument {
        id: product.id,
        name: product.name.clone(),
        description: product.description.clone(),
        price: product.price,
        category_ids,
    };
    if let Err(err) = state.search.index_product(&doc).await {
        tracing::warn!("Failed to index product {}: {:#}", product.id, err);
    }
}

#[derive(Deserialize, IntoParams)]
struct ListProductsParams {
    /// Comma-separated product ids to restrict the listing to.
    ids: Option<String>,
    page: Option<i64>,
    per_page: Option<i64>,
}

#[derive(Serialize, ToSchema)]
struct ProductRes {
    pub product: ProductEntity,
    pub category_ids: Vec<i32>,
}

/// List products, newest first.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Products"],
    params(ListProductsParams),
    responses(
        (status = 200, description = "List products", body = StdResponse<Vec<ProductEntity>, String>)
    )
)]
async fn get_products(
    Query(params): Query<ListProductsParams>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let per_page = params.per_page.unwrap_or(20).clamp(1, 100);
    let offset = (params.page.unwrap_or(1).max(1) - 1) * per_page;

    let mut query = products::table
        .order_by(products::created_at.desc())
        .limit(per_page)
        .offset(offset)
        .into_boxed();

    if let Some(ids) = &params.ids {
        let ids: Vec<i32> = ids.split(',').filter_map(|id| id.trim().parse().ok()).collect();
        query = query.filter(products::id.eq_any(ids));
    }

    let listing: Vec<ProductEntity> = query
        .get_results(conn)
        .await
        .context("Failed to get products")?;

    Ok(StdResponse {
        data: Some(listing),
        message: Some("Get products successfully"),
    })
}

/// Fetch one product with its category links.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Products"],
    params(
        ("id" = i32, Path, description = "Product ID to fetch")
    ),
    responses(
        (status = 200, description = "Get product successfully", body = StdResponse<ProductRes, String>)
    )
)]
async fn get_product(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let product: ProductEntity = products::table
        .find(id)
        .get_result(conn)
        .await
        .map_err(|_| AppError::NotFound)?;

    let category_ids = category_ids_of(conn, product.id).await?;

    Ok(StdResponse {
        data: Some(ProductRes {
            product,
            category_ids,
        }),
        message: Some("Get product successfully"),
    })
}

/// Full-text product search, proxied to the document index.
#[utoipa::path(
    get,
    path = "/search",
    tags = ["Products"],
    params(ProductSearchParams),
    responses(
        (status = 200, description = "Search results", body = StdResponse<Vec<ProductDocument>, String>),
        (status = 503, description = "Search index unreachable")
    )
)]
async fn search_products(
    Query(params): Query<ProductSearchParams>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let body = build_product_query(&params);
    let hits = state.search.search_products(&body).await?;

    Ok(StdResponse {
        data: Some(hits),
        message: Some("Search products successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct CreateProductReq {
    pub name: String,
    pub description: String,
    pub price: f32,
    #[serde(default)]
    pub category_ids: Vec<i32>,
    pub is_active: Option<bool>,
}

/// Create a product and link its categories.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Products"],
    security(("bearerAuth" = [])),
    request_body = CreateProductReq,
    responses(
        (status = 200, description = "Created product successfully", body = StdResponse<ProductRes, String>),
        (status = 403, description = "Not an admin or approved vendor")
    )
)]
async fn create_product(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CreateProductReq>,
) -> Result<impl IntoResponse, AppError> {
    if body.price < 0.0 {
        return Err(AppError::Validation("Price cannot be negative".into()));
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let vendor_id = catalog_writer_vendor_id(conn, user).await?;

    let (product, category_ids) = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let product: ProductEntity = diesel::insert_into(products::table)
                    .values(CreateProductEntity {
                        vendor_id,
                        name: body.name,
                        description: body.description,
                        price: body.price,
                        is_active: body.is_active.unwrap_or(true),
                    })
                    .returning(ProductEntity::as_returning())
                    .get_result(conn)
                    .await
                    .context("Failed to create product")?;

                let links: Vec<ProductCategoryEntity> = body
                    .category_ids
                    .iter()
                    .map(|&category_id| ProductCategoryEntity {
                        product_id: product.id,
                        category_id,
                    })
                    .collect();

                diesel::insert_into(product_categories::table)
                    .values(links)
                    .execute(conn)
                    .await
                    .context("Failed to link categories")?;

                Ok::<(ProductEntity, Vec<i32>), anyhow::Error>((product, body.category_ids))
            })
        })
        .await
        .context("Transaction failed")?;

    sync_index(&state, &product, category_ids.clone()).await;

    Ok(StdResponse {
        data: Some(ProductRes {
            product,
            category_ids,
        }),
        message: Some("Create product successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct UpdateProductReq {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<f32>,
    pub is_active: Option<bool>,
    /// When present, replaces the category links wholesale.
    pub category_ids: Option<Vec<i32>>,
}

/// Update a product. Vendors may only touch their own products.
#[utoipa::path(
    patch,
    path = "/{id}",
    tags = ["Products"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Product ID to update")
    ),
    request_body = UpdateProductReq,
    responses(
        (status = 200, description = "Updated product successfully", body = StdResponse<ProductRes, String>)
    )
)]
async fn update_product(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<UpdateProductReq>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(price) = body.price
        && price < 0.0
    {
        return Err(AppError::Validation("Price cannot be negative".into()));
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let vendor_id = catalog_writer_vendor_id(conn, user).await?;

    let existing: ProductEntity = products::table
        .find(id)
        .get_result(conn)
        .await
        .map_err(|_| AppError::NotFound)?;

    if let Some(vendor_id) = vendor_id
        && existing.vendor_id != Some(vendor_id)
    {
        return Err(AppError::ForbiddenResource(
            "Vendor does not own this product".into(),
        ));
    }

    let (product, category_ids) = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let product: ProductEntity = diesel::update(products::table.find(id))
                    .set((
                        UpdateProductEntity {
                            name: body.name,
                            description: body.description,
                            price: body.price,
                            is_active: body.is_active,
                        },
                        products::updated_at.eq(diesel::dsl::now),
                    ))
                    .returning(ProductEntity::as_returning())
                    .get_result(conn)
                    .await
                    .context("Failed to update product")?;

                let category_ids = match body.category_ids {
                    Some(category_ids) => {
                        diesel::delete(
                            product_categories::table
                                .filter(product_categories::product_id.eq(id)),
                        )
                        .execute(conn)
                        .await
                        .context("Failed to clear category links")?;

                        let links: Vec<ProductCategoryEntity> = category_ids
                            .iter()
                            .map(|&category_id| ProductCategoryEntity {
                                product_id: id,
                                category_id,
                            })
                            .collect();
                        diesel::insert_into(product_categories::table)
                            .values(links)
                            .execute(conn)
                            .await
                            .context("Failed to link categories")?;
                        category_ids
                    }
                    None => {
                        product_categories::table
                            .filter(product_categories::product_id.eq(id))
                            .select(product_categories::category_id)
                            .get_results(conn)
                            .await
                            .context("Failed to get product categories")?
                    }
                };

                Ok::<(ProductEntity, Vec<i32>), anyhow::Error>((product, category_ids))
            })
        })
        .await
        .context("Transaction failed")?;

    sync_index(&state, &product, category_ids.clone()).await;

    Ok(StdResponse {
        data: Some(ProductRes {
            product,
            category_ids,
        }),
        message: Some("Update product successfully"),
    })
}

/// Delete a product. Junction rows cascade; the search document is removed
/// best-effort.
#[utoipa::path(
    delete,
    path = "/{id}",
    tags = ["Products"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Product ID to delete")
    ),
    responses(
        (status = 200, description = "Deleted product successfully", body = StdResponse<ProductEntity, String>)
    )
)]
async fn delete_product(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let vendor_id = catalog_writer_vendor_id(conn, user).await?;

    let existing: ProductEntity = products::table
        .find(id)
        .get_result(conn)
        .await
        .map_err(|_| AppError::NotFound)?;

    if let Some(vendor_id) = vendor_id
        && existing.vendor_id != Some(vendor_id)
    {
        return Err(AppError::ForbiddenResource(
            "Vendor does not own this product".into(),
        ));
    }

    let deleted: ProductEntity = diesel::delete(products::table.find(id))
        .returning(ProductEntity::as_returning())
        .get_result(conn)
        .await
        .map_err(|_| AppError::NotFound)?;

    if let Err(err) = state.search.delete_product(id).await {
        tracing::warn!("Failed to remove product {} from index: {:#}", id, err);
    }

    Ok(StdResponse {
        data: Some(deleted),
        message: Some("Delete product successfully"),
    })
}
