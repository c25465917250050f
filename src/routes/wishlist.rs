use anyhow::Context;
use axum::{
    Extension,
    extract::{Path, State},
    response::IntoResponse,
};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware,
    },
    models::WishlistItemEntity,
    schema::wishlist_items,
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/wishlist",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_wishlist))
            .routes(utoipa_axum::routes!(add_to_wishlist))
            .routes(utoipa_axum::routes!(remove_from_wishlist))
            .route_layer(axum::middleware::from_fn(
                middleware::customers_authorization,
            )),
    )
}

/// List the authenticated user's saved products.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Wishlist"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "List wishlist items", body = StdResponse<Vec<WishlistItemEntity>, String>)
    )
)]
async fn get_wishlist(
    State(state): State<AppState>,
    Extension(user_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let items: Vec<WishlistItemEntity> = wishlist_items::table
        .filter(wishlist_items::user_id.eq(user_id))
        .order_by(wishlist_items::created_at.desc())
        .get_results(conn)
        .await
        .context("Failed to get wishlist")?;

    Ok(StdResponse {
        data: Some(items),
        message: Some("Get wishlist successfully"),
    })
}

/// Save a product. Saving one that is already saved is a no-op.
#[utoipa::path(
    put,
    path = "/{product_id}",
    tags = ["Wishlist"],
    security(("bearerAuth" = [])),
    params(
        ("product_id" = i32, Path, description = "Product to save")
    ),
    responses(
        (status = 200, description = "Product saved", body = StdResponse<WishlistItemEntity, String>)
    )
)]
async fn add_to_wishlist(
    Path(product_id): Path<i32>,
    State(state): State<AppState>,
    Extension(user_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    diesel::insert_into(wishlist_items::table)
        .values((
            wishlist_items::user_id.eq(user_id),
            wishlist_items::product_id.eq(product_id),
        ))
        .on_conflict_do_nothing()
        .execute(conn)
        .await
        .context("Failed to save wishlist item")?;

    let item: WishlistItemEntity = wishlist_items::table
        .find((user_id, product_id))
        .get_result(conn)
        .await
        .context("Failed to get wishlist item")?;

    Ok(StdResponse {
        data: Some(item),
        message: Some("Product saved successfully"),
    })
}

/// Remove a saved product.
#[utoipa::path(
    delete,
    path = "/{product_id}",
    tags = ["Wishlist"],
    security(("bearerAuth" = [])),
    params(
        ("product_id" = i32, Path, description = "Product to remove")
    ),
    responses(
        (status = 200, description = "Product removed", body = StdResponse<WishlistItemEntity, String>)
    )
)]
async fn remove_from_wishlist(
    Path(product_id): Path<i32>,
    State(state): State<AppState>,
    Extension(user_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let removed: WishlistItemEntity =
        diesel::delete(wishlist_items::table.find((user_id, product_id)))
            .returning(WishlistItemEntity::as_returning())
            .get_result(conn)
            .await
            .map_err(|_| AppError::NotFound)?;

    Ok(StdResponse {
        data: Some(removed),
        message: Some("Product removed successfully"),
    })
}
