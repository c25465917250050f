use anyhow::Context;
use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware,
    },
    domain::VendorStatus,
    models::{CreateVendorEntity, VendorEntity},
    schema::vendors,
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .nest(
            "/vendors",
            OpenApiRouter::new()
                .routes(utoipa_axum::routes!(apply_as_vendor))
                .routes(utoipa_axum::routes!(get_my_vendor))
                .route_layer(axum::middleware::from_fn(
                    middleware::customers_authorization,
                )),
        )
        .nest(
            "/vendors",
            OpenApiRouter::new()
                .routes(utoipa_axum::routes!(get_vendors))
                .routes(utoipa_axum::routes!(approve_vendor))
                .routes(utoipa_axum::routes!(reject_vendor))
                .route_layer(axum::middleware::from_fn(middleware::admin_authorization)),
        )
}

#[derive(Deserialize, ToSchema)]
struct ApplyVendorReq {
    pub shop_name: String,
}

/// Apply for a vendor account. One application per user; the account starts
/// `pending` and may not list products until approved.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Vendors"],
    security(("bearerAuth" = [])),
    request_body = ApplyVendorReq,
    responses(
        (status = 200, description = "Vendor application created", body = StdResponse<VendorEntity, String>),
        (status = 400, description = "User already has a vendor account")
    )
)]
async fn apply_as_vendor(
    State(state): State<AppState>,
    Extension(user_id): Extension<i32>,
    Json(body): Json<ApplyVendorReq>,
) -> Result<impl IntoResponse, AppError> {
    if body.shop_name.trim().is_empty() {
        return Err(AppError::Validation("Shop name cannot be empty".into()));
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let existing: i64 = vendors::table
        .filter(vendors::user_id.eq(user_id))
        .count()
        .get_result(conn)
        .await
        .context("Failed to check existing vendor")?;
    if existing > 0 {
        return Err(AppError::BadRequest(
            "User already has a vendor account".into(),
        ));
    }

    let vendor: VendorEntity = diesel::insert_into(vendors::table)
        .values(CreateVendorEntity {
            user_id,
            shop_name: body.shop_name,
            status: VendorStatus::Pending.as_str().into(),
        })
        .returning(VendorEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to create vendor")?;

    Ok(StdResponse {
        data: Some(vendor),
        message: Some("Vendor application created successfully"),
    })
}

/// Fetch the authenticated user's vendor account.
#[utoipa::path(
    get,
    path = "/my-vendor",
    tags = ["Vendors"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Get vendor successfully", body = StdResponse<VendorEntity, String>)
    )
)]
async fn get_my_vendor(
    State(state): State<AppState>,
    Extension(user_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let vendor: VendorEntity = vendors::table
        .filter(vendors::user_id.eq(user_id))
        .first(conn)
        .await
        .map_err(|_| AppError::NotFound)?;

    Ok(StdResponse {
        data: Some(vendor),
        message: Some("Get vendor successfully"),
    })
}

/// List all vendor accounts.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Vendors"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "List vendors", body = StdResponse<Vec<VendorEntity>, String>)
    )
)]
async fn get_vendors(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let listing: Vec<VendorEntity> = vendors::table
        .order_by(vendors::created_at.desc())
        .get_results(conn)
        .await
        .context("Failed to get vendors")?;

    Ok(StdResponse {
        data: Some(listing),
        message: Some("Get vendors successfully"),
    })
}

/// Set a vendor's moderation status. Re-applying the same status is a no-op
/// that still returns the row, so approve/reject are idempotent.
async fn set_vendor_status(
    state: &AppState,
    id: i32,
    status: VendorStatus,
) -> Result<VendorEntity, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let vendor: VendorEntity = diesel::update(vendors::table.find(id))
        .set((
            vendors::status.eq(status.as_str()),
            vendors::updated_at.eq(diesel::dsl::now),
        ))
        .returning(VendorEntity::as_returning())
        .get_result(conn)
        .await
        .map_err(|_| AppError::NotFound)?;

    Ok(vendor)
}

/// Approve a vendor account.
#[utoipa::path(
    patch,
    path = "/{id}/approve",
    tags = ["Vendors"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Vendor ID to approve")
    ),
    responses(
        (status = 200, description = "Vendor approved", body = StdResponse<VendorEntity, String>)
    )
)]
async fn approve_vendor(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let vendor = set_vendor_status(&state, id, VendorStatus::Approved).await?;
    Ok(StdResponse {
        data: Some(vendor),
        message: Some("Vendor approved successfully"),
    })
}

/// Reject a vendor account.
#[utoipa::path(
    patch,
    path = "/{id}/reject",
    tags = ["Vendors"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Vendor ID to reject")
    ),
    responses(
        (status = 200, description = "Vendor rejected", body = StdResponse<VendorEntity, String>)
    )
)]
async fn reject_vendor(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let vendor = set_vendor_status(&state, id, VendorStatus::Rejected).await?;
    Ok(StdResponse {
        data: Some(vendor),
        message: Some("Vendor rejected successfully"),
    })
}
