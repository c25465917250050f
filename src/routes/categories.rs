use anyhow::Context;
use axum::{
    Json,
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
    models::{CategoryEntity, CreateCategoryEntity},
    schema::categories,
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .nest(
            "/categories",
            OpenApiRouter::new()
                .routes(utoipa_axum::routes!(get_categories))
                .routes(utoipa_axum::routes!(get_category)),
        )
        .nest(
            "/categories",
            OpenApiRouter::new()
                .routes(utoipa_axum::routes!(create_category))
                .routes(utoipa_axum::routes!(update_category))
                .routes(utoipa_axum::routes!(delete_category))
                .route_layer(axum::middleware::from_fn(middleware::admin_authorization)),
        )
}

/// List all categories.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Categories"],
    responses(
        (status = 200, description = "List categories", body = StdResponse<Vec<CategoryEntity>, String>)
    )
)]
async fn get_categories(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let listing: Vec<CategoryEntity> = categories::table
        .order_by(categories::name.asc())
        .get_results(conn)
        .await
        .context("Failed to get categories")?;

    Ok(StdResponse {
        data: Some(listing),
        message: Some("Get categories successfully"),
    })
}

/// Fetch one category.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Categories"],
    params(
        ("id" = i32, Path, description = "Category ID to fetch")
    ),
    responses(
        (status = 200, description = "Get category successfully", body = StdResponse<CategoryEntity, String>)
    )
)]
async fn get_category(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let category: CategoryEntity = categories::table
        .find(id)
        .get_result(conn)
        .await
        .map_err(|_| AppError::NotFound)?;

    Ok(StdResponse {
        data: Some(category),
        message: Some("Get category successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct CategoryReq {
    pub name: String,
}

/// Create a category.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Categories"],
    security(("bearerAuth" = [])),
    request_body = CategoryReq,
    responses(
        (status = 200, description = "Created category successfully", body = StdResponse<CategoryEntity, String>)
    )
)]
async fn create_category(
    State(state): State<AppState>,
    Json(body): Json<CategoryReq>,
) -> Result<impl IntoResponse, AppError> {
    if body.name.trim().is_empty() {
        return Err(AppError::Validation("Category name cannot be empty".into()));
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let category: CategoryEntity = diesel::insert_into(categories::table)
        .values(CreateCategoryEntity { name: body.name })
        .returning(CategoryEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to create category")?;

    Ok(StdResponse {
        data: Some(category),
        message: Some("Create category successfully"),
    })
}

/// Rename a category.
#[utoipa::path(
    patch,
    path = "/{id}",
    tags = ["Categories"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Category ID to update")
    ),
    request_body = CategoryReq,
    responses(
        (status = 200, description = "Updated category successfully", body = StdResponse<CategoryEntity, String>)
    )
)]
async fn update_category(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Json(body): Json<CategoryReq>,
) -> Result<impl IntoResponse, AppError> {
    if body.name.trim().is_empty() {
        return Err(AppError::Validation("Category name cannot be empty".into()));
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let category: CategoryEntity = diesel::update(categories::table.find(id))
        .set((
            categories::name.eq(body.name),
            categories::updated_at.eq(diesel::dsl::now),
        ))
        .returning(CategoryEntity::as_returning())
        .get_result(conn)
        .await
        .map_err(|_| AppError::NotFound)?;

    Ok(StdResponse {
        data: Some(category),
        message: Some("Update category successfully"),
    })
}

/// Delete a category. The junction rows cascade away; products themselves
/// are untouched.
#[utoipa::path(
    delete,
    path = "/{id}",
    tags = ["Categories"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Category ID to delete")
    ),
    responses(
        (status = 200, description = "Deleted category successfully", body = StdResponse<CategoryEntity, String>)
    )
)]
async fn delete_category(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let deleted: CategoryEntity = diesel::delete(categories::table.find(id))
        .returning(CategoryEntity::as_returning())
        .get_result(conn)
        .await
        .map_err(|_| AppError::NotFound)?;

    Ok(StdResponse {
        data: Some(deleted),
        message: Some("Delete category successfully"),
    })
}
