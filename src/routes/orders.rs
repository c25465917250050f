use std::collections::HashMap;

use anyhow::Context;
use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware,
    },
    domain::{self, OrderStatus, PaymentMethod},
    models::{
        CartItemEntity, CreateOrderEntity, OrderEntity, OrderItemEntity, ProductEntity,
    },
    schema::{cart_items, carts, order_items, orders, products},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .nest(
            "/orders",
            OpenApiRouter::new()
                .routes(utoipa_axum::routes!(create_order))
                .routes(utoipa_axum::routes!(get_my_orders))
                .routes(utoipa_axum::routes!(get_order))
                .routes(utoipa_axum::routes!(cancel_order))
                .route_layer(axum::middleware::from_fn(
                    middleware::customers_authorization,
                )),
        )
        .nest(
            "/orders",
            OpenApiRouter::new()
                .routes(utoipa_axum::routes!(get_orders))
                .routes(utoipa_axum::routes!(update_order_status))
                .route_layer(axum::middleware::from_fn(middleware::admin_authorization)),
        )
}

#[derive(Serialize, ToSchema)]
struct GetOrderRes {
    pub order: OrderEntity,
    pub order_items: Vec<OrderItemEntity>,
}

#[derive(Deserialize, ToSchema)]
struct CreateOrderReq {
    /// Free-form shipping address fields captured at checkout.
    pub shipping_address: Value,
    /// One of `cod`, `bank_transfer`, `card`.
    pub payment_method: String,
}

/// Checkout: snapshot the shopper's cart into an immutable order.
///
/// Validates the cart is non-empty, copies each line's product name and
/// current price into order items, computes the total and empties the cart —
/// all inside one transaction so a half-created order can never keep a
/// populated cart.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    request_body = CreateOrderReq,
    responses(
        (status = 200, description = "Created order successfully", body = StdResponse<GetOrderRes, String>),
        (status = 422, description = "Cart is empty or payment method unknown")
    )
)]
async fn create_order(
    State(state): State<AppState>,
    Extension(user_id): Extension<i32>,
    Json(body): Json<CreateOrderReq>,
) -> Result<impl IntoResponse, AppError> {
    let payment_method = PaymentMethod::parse(&body.payment_method).ok_or_else(|| {
        AppError::Validation(format!(
            "{} is not a valid payment method",
            body.payment_method
        ))
    })?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let (order, items) = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let cart_id: Option<i32> = carts::table
                    .filter(carts::user_id.eq(user_id))
                    .select(carts::id)
                    .first(conn)
                    .await
                    .map(Some)
                    .or_else(|err| match err {
                        diesel::result::Error::NotFound => Ok(None),
                        err => Err(err),
                    })
                    .context("Failed to look up cart")?;

                let cart_id =
                    cart_id.ok_or_else(|| AppError::Validation("Cart is empty".into()))?;

                let cart_lines: Vec<CartItemEntity> = cart_items::table
                    .filter(cart_items::cart_id.eq(cart_id))
                    .get_results(conn)
                    .await
                    .context("Failed to get cart items")?;

                if cart_lines.is_empty() {
                    return Err(AppError::Validation("Cart is empty".into()));
                }

                let product_ids: Vec<i32> =
                    cart_lines.iter().map(|line| line.product_id).collect();
                let catalog: Vec<ProductEntity> = products::table
                    .filter(products::id.eq_any(&product_ids))
                    .get_results(conn)
                    .await
                    .context("Failed to get products")?;
                let catalog: HashMap<i32, ProductEntity> =
                    catalog.into_iter().map(|p| (p.id, p)).collect();

                let mut snapshots = Vec::with_capacity(cart_lines.len());
                for line in &cart_lines {
                    let product = catalog.get(&line.product_id).ok_or_else(|| {
                        AppError::Validation(format!(
                            "Product {} is no longer available",
                            line.product_id
                        ))
                    })?;
                    snapshots.push((product, line.quantity));
                }

                let total = domain::order_total(
                    snapshots
                        .iter()
                        .map(|(product, quantity)| (product.price, *quantity)),
                );

                let order: OrderEntity = diesel::insert_into(orders::table)
                    .values(CreateOrderEntity {
                        user_id,
                        status: OrderStatus::Pending.as_str().into(),
                        payment_method: payment_method.as_str().into(),
                        shipping_address: body.shipping_address,
                        total,
                    })
                    .returning(OrderEntity::as_returning())
                    .get_result(conn)
                    .await
                    .context("Failed to create order")?;

                let new_items: Vec<OrderItemEntity> = snapshots
                    .into_iter()
                    .map(|(product, quantity)| OrderItemEntity {
                        order_id: order.id,
                        product_id: product.id,
                        product_name: product.name.clone(),
                        unit_price: product.price,
                        quantity,
                    })
                    .collect();

                let items: Vec<OrderItemEntity> = diesel::insert_into(order_items::table)
                    .values(new_items)
                    .returning(OrderItemEntity::as_returning())
                    .get_results(conn)
                    .await
                    .context("Failed to create order items")?;

                diesel::delete(cart_items::table.filter(cart_items::cart_id.eq(cart_id)))
                    .execute(conn)
                    .await
                    .context("Failed to clear cart")?;

                Ok::<(OrderEntity, Vec<OrderItemEntity>), AppError>((order, items))
            })
        })
        .await?;

    Ok(StdResponse {
        data: Some(GetOrderRes {
            order,
            order_items: items,
        }),
        message: Some("Create order successfully"),
    })
}

/// Fetch all orders in the system.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "List all orders", body = StdResponse<Vec<OrderEntity>, String>)
    )
)]
async fn get_orders(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let orders: Vec<OrderEntity> = orders::table
        .order_by(orders::created_at.desc())
        .get_results(conn)
        .await
        .context("Failed to get orders")?;

    Ok(StdResponse {
        data: Some(orders),
        message: Some("Get orders successfully"),
    })
}

/// Fetch all orders belonging to the authenticated user.
#[utoipa::path(
    get,
    path = "/my-orders",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "List my orders", body = StdResponse<Vec<GetOrderRes>, String>)
    )
)]
async fn get_my_orders(
    State(state): State<AppState>,
    Extension(user_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let orders: Vec<OrderEntity> = orders::table
        .filter(orders::user_id.eq(user_id))
        .order_by(orders::updated_at.desc())
        .get_results(conn)
        .await
        .context("Failed to get my orders")?;

    let order_ids: Vec<i32> = orders.iter().map(|order| order.id).collect();
    let items: Vec<OrderItemEntity> = order_items::table
        .filter(order_items::order_id.eq_any(&order_ids))
        .get_results(conn)
        .await
        .context("Failed to get order items")?;

    let mut group: HashMap<i32, Vec<OrderItemEntity>> = HashMap::new();
    for item in items {
        group.entry(item.order_id).or_default().push(item);
    }

    let orders_with_items: Vec<GetOrderRes> = orders
        .into_iter()
        .map(|order| GetOrderRes {
            order_items: group.remove(&order.id).unwrap_or_default(),
            order,
        })
        .collect();

    Ok(StdResponse {
        data: Some(orders_with_items),
        message: Some("Get my orders successfully"),
    })
}

/// Fetch a specific order belonging to the authenticated user.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Order ID to fetch")
    ),
    responses(
        (status = 200, description = "Get order successfully", body = StdResponse<GetOrderRes, String>)
    )
)]
async fn get_order(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(user_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let order: OrderEntity = orders::table
        .find(id)
        .filter(orders::user_id.eq(user_id))
        .get_result(conn)
        .await
        .map_err(|_| AppError::NotFound)?;

    let order_items: Vec<OrderItemEntity> = order_items::table
        .filter(order_items::order_id.eq(order.id))
        .get_results(conn)
        .await
        .context("Failed to get order items")?;

    Ok(StdResponse {
        data: Some(GetOrderRes { order, order_items }),
        message: Some("Get order successfully"),
    })
}

/// Cancel an order. Shoppers may only cancel before shipment.
#[utoipa::path(
    delete,
    path = "/{id}",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Order ID to cancel")
    ),
    responses(
        (status = 200, description = "Cancelled order successfully", body = StdResponse<OrderEntity, String>),
        (status = 400, description = "Order is past the cancellable states")
    )
)]
async fn cancel_order(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(user_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let order: OrderEntity = orders::table
        .find(id)
        .filter(orders::user_id.eq(user_id))
        .get_result(conn)
        .await
        .map_err(|_| AppError::NotFound)?;

    let status = domain::stored_order_status(&order.status)?;
    if !status.cancellable() {
        return Err(AppError::BadRequest(format!(
            "Order in status {} cannot be cancelled",
            order.status
        )));
    }

    // The status filter is repeated in the UPDATE so a concurrent transition
    // loses instead of being silently overwritten.
    let cancelled: OrderEntity = diesel::update(
        orders::table
            .find(id)
            .filter(orders::user_id.eq(user_id))
            .filter(orders::status.eq(order.status.clone())),
    )
    .set((
        orders::status.eq(OrderStatus::Cancelled.as_str()),
        orders::updated_at.eq(diesel::dsl::now),
    ))
    .returning(OrderEntity::as_returning())
    .get_result(conn)
    .await
    .map_err(|_| AppError::NotFound)?;

    Ok(StdResponse {
        data: Some(cancelled),
        message: Some("Cancelled order successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct UpdateOrderStatusReq {
    /// Target status; must be a legal single step from the current one.
    pub status: String,
}

/// Advance an order's status (admin action, e.g. marking it shipped).
#[utoipa::path(
    patch,
    path = "/{id}/status",
    tags = ["Orders"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Order ID to transition")
    ),
    request_body = UpdateOrderStatusReq,
    responses(
        (status = 200, description = "Order status updated", body = StdResponse<OrderEntity, String>),
        (status = 400, description = "Illegal status transition")
    )
)]
async fn update_order_status(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Json(body): Json<UpdateOrderStatusReq>,
) -> Result<impl IntoResponse, AppError> {
    let next = OrderStatus::parse(&body.status)
        .ok_or_else(|| AppError::BadRequest(format!("{} is not a valid status", body.status)))?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let order: OrderEntity = orders::table
        .find(id)
        .get_result(conn)
        .await
        .map_err(|_| AppError::NotFound)?;

    let current = domain::stored_order_status(&order.status)?;
    if !current.can_transition(next) {
        return Err(AppError::BadRequest(format!(
            "Cannot transition order from {} to {}",
            order.status, body.status
        )));
    }

    let updated: OrderEntity = diesel::update(
        orders::table
            .find(id)
            .filter(orders::status.eq(order.status.clone())),
    )
    .set((
        orders::status.eq(next.as_str()),
        orders::updated_at.eq(diesel::dsl::now),
    ))
    .returning(OrderEntity::as_returning())
    .get_result(conn)
    .await
    .map_err(|_| AppError::NotFound)?;

    Ok(StdResponse {
        data: Some(updated),
        message: Some("Order status updated successfully"),
    })
}
