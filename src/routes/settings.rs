use anyhow::Context;
use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use serde_json::Value;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware,
    },
    models::SettingEntity,
    schema::settings,
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .nest(
            "/settings",
            OpenApiRouter::new()
                .routes(utoipa_axum::routes!(get_settings))
                .routes(utoipa_axum::routes!(get_setting)),
        )
        .nest(
            "/settings",
            OpenApiRouter::new()
                .routes(utoipa_axum::routes!(put_setting))
                .routes(utoipa_axum::routes!(delete_setting))
                .route_layer(axum::middleware::from_fn(middleware::admin_authorization)),
        )
}

/// List all settings. The storefront reads these for theming, currency
/// display and the like.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Settings"],
    responses(
        (status = 200, description = "List settings", body = StdResponse<Vec<SettingEntity>, String>)
    )
)]
async fn get_settings(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let listing: Vec<SettingEntity> = settings::table
        .order_by(settings::key.asc())
        .get_results(conn)
        .await
        .context("Failed to get settings")?;

    Ok(StdResponse {
        data: Some(listing),
        message: Some("Get settings successfully"),
    })
}

/// Fetch a single setting by key.
#[utoipa::path(
    get,
    path = "/{key}",
    tags = ["Settings"],
    params(
        ("key" = String, Path, description = "Setting key to fetch")
    ),
    responses(
        (status = 200, description = "Get setting successfully", body = StdResponse<SettingEntity, String>)
    )
)]
async fn get_setting(
    Path(key): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let setting: SettingEntity = settings::table
        .find(key)
        .get_result(conn)
        .await
        .map_err(|_| AppError::NotFound)?;

    Ok(StdResponse {
        data: Some(setting),
        message: Some("Get setting successfully"),
    })
}

/// Create or overwrite a setting.
#[utoipa::path(
    put,
    path = "/{key}",
    tags = ["Settings"],
    security(("bearerAuth" = [])),
    params(
        ("key" = String, Path, description = "Setting key to write")
    ),
    request_body = Value,
    responses(
        (status = 200, description = "Setting written", body = StdResponse<SettingEntity, String>)
    )
)]
async fn put_setting(
    Path(key): Path<String>,
    State(state): State<AppState>,
    Json(value): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let setting: SettingEntity = diesel::insert_into(settings::table)
        .values((settings::key.eq(&key), settings::value.eq(&value)))
        .on_conflict(settings::key)
        .do_update()
        .set((
            settings::value.eq(&value),
            settings::updated_at.eq(Utc::now()),
        ))
        .returning(SettingEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to write setting")?;

    Ok(StdResponse {
        data: Some(setting),
        message: Some("Setting written successfully"),
    })
}

/// Delete a setting.
#[utoipa::path(
    delete,
    path = "/{key}",
    tags = ["Settings"],
    security(("bearerAuth" = [])),
    params(
        ("key" = String, Path, description = "Setting key to delete")
    ),
    responses(
        (status = 200, description = "Setting deleted", body = StdResponse<SettingEntity, String>)
    )
)]
async fn delete_setting(
    Path(key): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let deleted: SettingEntity = diesel::delete(settings::table.find(key))
        .returning(SettingEntity::as_returning())
        .get_result(conn)
        .await
        .map_err(|_| AppError::NotFound)?;

    Ok(StdResponse {
        data: Some(deleted),
        message: Some("Setting deleted successfully"),
    })
}
