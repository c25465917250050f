use std::collections::HashMap;

use anyhow::Context;
use axum::{Extension, Json, extract::Path, extract::State, response::IntoResponse};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware::{self, ShopperId},
    },
    models::{CartEntity, CartItemEntity, CreateCartEntity},
    schema::{cart_items, carts, products},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/carts",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_my_cart))
            .routes(utoipa_axum::routes!(replace_my_cart))
            .routes(utoipa_axum::routes!(remove_cart_item))
            .route_layer(axum::middleware::from_fn(middleware::shopper_identity)),
    )
}

async fn find_cart(
    conn: &mut AsyncPgConnection,
    shopper: &ShopperId,
) -> Result<Option<CartEntity>, AppError> {
    let cart = match shopper {
        ShopperId::User(user_id) => {
            carts::table
                .filter(carts::user_id.eq(user_id))
                .first::<CartEntity>(conn)
                .await
        }
        ShopperId::Guest(session_id) => {
            carts::table
                .filter(carts::session_id.eq(session_id))
                .first::<CartEntity>(conn)
                .await
        }
    };
    cart.optional()
        .context("Failed to look up cart")
        .map_err(AppError::Other)
}

async fn find_or_create_cart(
    conn: &mut AsyncPgConnection,
    shopper: &ShopperId,
) -> Result<CartEntity, AppError> {
    if let Some(cart) = find_cart(conn, shopper).await? {
        return Ok(cart);
    }

    let new_cart = match shopper {
        ShopperId::User(user_id) => CreateCartEntity {
            user_id: Some(*user_id),
            session_id: None,
        },
        ShopperId::Guest(session_id) => CreateCartEntity {
            user_id: None,
            session_id: Some(session_id.clone()),
        },
    };

    let cart = diesel::insert_into(carts::table)
        .values(new_cart)
        .returning(CartEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to create cart")?;

    Ok(cart)
}

async fn unit_prices(
    conn: &mut AsyncPgConnection,
    product_ids: &[i32],
) -> Result<HashMap<i32, f32>, AppError> {
    let rows: Vec<(i32, f32)> = products::table
        .filter(products::id.eq_any(product_ids))
        .select((products::id, products::price))
        .get_results(conn)
        .await
        .context("Failed to get product prices")?;
    Ok(rows.into_iter().collect())
}

#[derive(Serialize, ToSchema)]
struct GetCartRes {
    pub cart: CartEntity,
    pub cart_items: Vec<CartItemEntity>,
    pub total_price: f32,
}

/// Fetch (or lazily create) the cart for the current shopper identity.
#[utoipa::path(
    get,
    path = "/my-cart",
    tags = ["Carts"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Current shopper's cart", body = StdResponse<GetCartRes, String>)
    )
)]
async fn get_my_cart(
    State(state): State<AppState>,
    Extension(shopper): Extension<ShopperId>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let cart = find_or_create_cart(conn, &shopper).await?;

    let cart_items: Vec<CartItemEntity> = cart_items::table
        .filter(cart_items::cart_id.eq(cart.id))
        .get_results(conn)
        .await
        .context("Failed to get cart items")?;

    let product_ids: Vec<i32> = cart_items.iter().map(|item| item.product_id).collect();
    let prices = unit_prices(conn, &product_ids).await?;

    let total_price: f32 = cart_items
        .iter()
        .map(|item| item.quantity as f32 * prices.get(&item.product_id).copied().unwrap_or(0.0))
        .sum();

    Ok(StdResponse {
        data: Some(GetCartRes {
            cart,
            cart_items,
            total_price,
        }),
        message: Some("Get cart successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct ReplaceCartReq {
    pub cart_items: Vec<ReplaceCartReqItem>,
}

#[derive(Deserialize, ToSchema)]
struct ReplaceCartReqItem {
    pub product_id: i32,
    pub quantity: i32,
}

#[derive(Serialize, ToSchema)]
struct ReplaceCartRes {
    pub cart: CartEntity,
    pub cart_items: Vec<CartItemEntity>,
}

/// Replace the cart's line items wholesale: quantities are upserted, items
/// missing from the request are removed, non-positive quantities dropped.
#[utoipa::path(
    put,
    path = "/my-cart",
    tags = ["Carts"],
    security(("bearerAuth" = [])),
    request_body = ReplaceCartReq,
    responses(
        (status = 200, description = "Cart replaced", body = StdResponse<ReplaceCartRes, String>)
    )
)]
async fn replace_my_cart(
    State(state): State<AppState>,
    Extension(shopper): Extension<ShopperId>,
    Json(body): Json<ReplaceCartReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let cart = find_or_create_cart(conn, &shopper).await?;
    let cart_id = cart.id;

    let items: Vec<ReplaceCartReqItem> = body
        .cart_items
        .into_iter()
        .filter(|item| item.quantity > 0)
        .collect();

    let cart_items = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let kept_product_ids: Vec<i32> =
                    items.iter().map(|item| item.product_id).collect();

                diesel::delete(
                    cart_items::table
                        .filter(cart_items::cart_id.eq(cart_id))
                        .filter(cart_items::product_id.ne_all(&kept_product_ids)),
                )
                .execute(conn)
                .await
                .context("Failed to delete cart items")?;

                for item in &items {
                    diesel::insert_into(cart_items::table)
                        .values((
                            cart_items::cart_id.eq(cart_id),
                            cart_items::product_id.eq(item.product_id),
                            cart_items::quantity.eq(item.quantity),
                        ))
                        .on_conflict((cart_items::cart_id, cart_items::product_id))
                        .do_update()
                        .set(cart_items::quantity.eq(item.quantity))
                        .execute(conn)
                        .await
                        .context("Failed to upsert cart item")?;
                }

                diesel::update(carts::table.find(cart_id))
                    .set(carts::updated_at.eq(diesel::dsl::now))
                    .execute(conn)
                    .await
                    .context("Failed to touch cart timestamp")?;

                let cart_items: Vec<CartItemEntity> = cart_items::table
                    .filter(cart_items::cart_id.eq(cart_id))
                    .get_results(conn)
                    .await
                    .context("Failed to get updated items")?;

                Ok::<Vec<CartItemEntity>, anyhow::Error>(cart_items)
            })
        })
        .await
        .context("Transaction failed")?;

    Ok(StdResponse {
        data: Some(ReplaceCartRes { cart, cart_items }),
        message: Some("Cart replaced successfully"),
    })
}

/// Remove a single line item from the shopper's cart.
#[utoipa::path(
    delete,
    path = "/my-cart/items/{product_id}",
    tags = ["Carts"],
    security(("bearerAuth" = [])),
    params(
        ("product_id" = i32, Path, description = "Product to remove from the cart")
    ),
    responses(
        (status = 200, description = "Item removed", body = StdResponse<CartItemEntity, String>)
    )
)]
async fn remove_cart_item(
    Path(product_id): Path<i32>,
    State(state): State<AppState>,
    Extension(shopper): Extension<ShopperId>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let cart = find_cart(conn, &shopper).await?.ok_or(AppError::NotFound)?;

    let removed: CartItemEntity = diesel::delete(
        cart_items::table
            .filter(cart_items::cart_id.eq(cart.id))
            .filter(cart_items::product_id.eq(product_id)),
    )
    .returning(CartItemEntity::as_returning())
    .get_result(conn)
    .await
    .map_err(|_| AppError::NotFound)?;

    Ok(StdResponse {
        data: Some(removed),
        message: Some("Item removed successfully"),
    })
}
