use anyhow::Context;
use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware,
    },
    models::LoyaltyPointsEntity,
    schema::loyalty_points,
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .nest(
            "/loyalty-points",
            OpenApiRouter::new()
                .routes(utoipa_axum::routes!(get_my_balance))
                .route_layer(axum::middleware::from_fn(
                    middleware::customers_authorization,
                )),
        )
        .nest(
            "/loyalty-points",
            OpenApiRouter::new()
                .routes(utoipa_axum::routes!(get_balance))
                .routes(utoipa_axum::routes!(add_points))
                .routes(utoipa_axum::routes!(deduct_points))
                .route_layer(axum::middleware::from_fn(middleware::admin_authorization)),
        )
}

#[derive(Serialize, ToSchema)]
struct BalanceRes {
    pub user_id: i32,
    pub points: i32,
}

async fn balance_of(state: &AppState, user_id: i32) -> Result<BalanceRes, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let row: Option<LoyaltyPointsEntity> = loyalty_points::table
        .find(user_id)
        .get_result(conn)
        .await
        .optional()
        .context("Failed to get loyalty balance")?;

    // A user with no ledger row simply has nothing accrued yet.
    Ok(BalanceRes {
        user_id,
        points: row.map(|row| row.points).unwrap_or(0),
    })
}

/// Fetch the authenticated user's loyalty balance.
#[utoipa::path(
    get,
    path = "/",
    tags = ["LoyaltyPoints"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Current balance", body = StdResponse<BalanceRes, String>)
    )
)]
async fn get_my_balance(
    State(state): State<AppState>,
    Extension(user_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    let balance = balance_of(&state, user_id).await?;
    Ok(StdResponse {
        data: Some(balance),
        message: Some("Get balance successfully"),
    })
}

/// Fetch any user's loyalty balance.
#[utoipa::path(
    get,
    path = "/{user_id}",
    tags = ["LoyaltyPoints"],
    security(("bearerAuth" = [])),
    params(
        ("user_id" = i32, Path, description = "User whose balance to fetch")
    ),
    responses(
        (status = 200, description = "Balance", body = StdResponse<BalanceRes, String>)
    )
)]
async fn get_balance(
    Path(user_id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let balance = balance_of(&state, user_id).await?;
    Ok(StdResponse {
        data: Some(balance),
        message: Some("Get balance successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct AdjustPointsReq {
    /// Positive number of points to add or deduct.
    pub points: i32,
}

/// Credit points to a user's balance, creating the ledger row on first use.
#[utoipa::path(
    post,
    path = "/{user_id}/add",
    tags = ["LoyaltyPoints"],
    security(("bearerAuth" = [])),
    params(
        ("user_id" = i32, Path, description = "User to credit")
    ),
    request_body = AdjustPointsReq,
    responses(
        (status = 200, description = "Points added", body = StdResponse<LoyaltyPointsEntity, String>)
    )
)]
async fn add_points(
    Path(user_id): Path<i32>,
    State(state): State<AppState>,
    Json(body): Json<AdjustPointsReq>,
) -> Result<impl IntoResponse, AppError> {
    if body.points <= 0 {
        return Err(AppError::Validation("Points must be positive".into()));
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let updated: LoyaltyPointsEntity = diesel::insert_into(loyalty_points::table)
        .values((
            loyalty_points::user_id.eq(user_id),
            loyalty_points::points.eq(body.points),
        ))
        .on_conflict(loyalty_points::user_id)
        .do_update()
        .set((
            loyalty_points::points.eq(loyalty_points::points + body.points),
            loyalty_points::updated_at.eq(Utc::now()),
        ))
        .returning(LoyaltyPointsEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to add points")?;

    Ok(StdResponse {
        data: Some(updated),
        message: Some("Points added successfully"),
    })
}

/// Debit points from a user's balance. The balance can never go negative.
#[utoipa::path(
    post,
    path = "/{user_id}/deduct",
    tags = ["LoyaltyPoints"],
    security(("bearerAuth" = [])),
    params(
        ("user_id" = i32, Path, description = "User to debit")
    ),
    request_body = AdjustPointsReq,
    responses(
        (status = 200, description = "Points deducted", body = StdResponse<LoyaltyPointsEntity, String>),
        (status = 422, description = "Insufficient balance")
    )
)]
async fn deduct_points(
    Path(user_id): Path<i32>,
    State(state): State<AppState>,
    Json(body): Json<AdjustPointsReq>,
) -> Result<impl IntoResponse, AppError> {
    if body.points <= 0 {
        return Err(AppError::Validation("Points must be positive".into()));
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    // The balance guard lives in the UPDATE itself so concurrent deductions
    // cannot race the ledger below zero.
    let updated: Option<LoyaltyPointsEntity> = diesel::update(
        loyalty_points::table
            .find(user_id)
            .filter(loyalty_points::points.ge(body.points)),
    )
    .set((
        loyalty_points::points.eq(loyalty_points::points - body.points),
        loyalty_points::updated_at.eq(Utc::now()),
    ))
    .returning(LoyaltyPointsEntity::as_returning())
    .get_result(conn)
    .await
    .optional()
    .context("Failed to deduct points")?;

    let updated =
        updated.ok_or_else(|| AppError::Validation("Insufficient loyalty balance".into()))?;

    Ok(StdResponse {
        data: Some(updated),
        message: Some("Points deducted successfully"),
    })
}
