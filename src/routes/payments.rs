use anyhow::Context;
use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    api::gateway,
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware,
    },
    domain::{self, OrderStatus, PaymentMethod, PaymentStatus},
    models::{CreatePaymentEntity, OrderEntity, PaymentEntity},
    schema::{orders, payments},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .nest(
            "/orders",
            OpenApiRouter::new()
                .routes(utoipa_axum::routes!(create_payment_for_order))
                .route_layer(axum::middleware::from_fn(
                    middleware::customers_authorization,
                )),
        )
        .nest(
            "/payments",
            OpenApiRouter::new()
                .routes(utoipa_axum::routes!(get_payment))
                .routes(utoipa_axum::routes!(confirm_payment))
                .routes(utoipa_axum::routes!(fail_payment))
                .routes(utoipa_axum::routes!(refund_payment))
                .route_layer(axum::middleware::from_fn(middleware::admin_authorization)),
        )
}

#[derive(Serialize, ToSchema)]
struct CreatePaymentRes {
    pub payment: PaymentEntity,
    /// Static buyer instructions for COD and bank transfer; `None` for card
    /// payments, which continue at the gateway.
    pub instructions: Option<&'static str>,
}

/// Create a payment attempt for an order, in `PENDING` status with the
/// amount copied from the order total.
///
/// COD and bank transfer involve no external call; card registers an intent
/// with the gateway and stores its reference. Earlier failed attempts may
/// leave extra payment rows behind; confirmation guards against a second
/// `PAID` one.
#[utoipa::path(
    post,
    path = "/{id}/payments",
    tags = ["Payments"],
    security(("bearerAuth" = [])),
    params(
        ("id" = i32, Path, description = "Order ID to create a payment for")
    ),
    responses(
        (status = 200, description = "Created payment successfully", body = StdResponse<CreatePaymentRes, String>),
        (status = 400, description = "Order is not awaiting payment")
    )
)]
async fn create_payment_for_order(
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

    if domain::stored_order_status(&order.status)? != OrderStatus::Pending {
        return Err(AppError::BadRequest(format!(
            "Order in status {} is not awaiting payment",
            order.status
        )));
    }

    let method = PaymentMethod::parse(&order.payment_method).ok_or_else(|| {
        AppError::Other(anyhow::anyhow!(
            "Unknown payment method on order: {}",
            order.payment_method
        ))
    })?;

    let provider_ref = match method {
        PaymentMethod::Card => Some(
            gateway::create_payment_intent(state.http_client.clone(), order.id, order.total)
                .await?,
        ),
        _ => None,
    };

    let payment: PaymentEntity = diesel::insert_into(payments::table)
        .values(CreatePaymentEntity {
            order_id: order.id,
            amount: order.total,
            provider: method.provider().as_str().into(),
            status: PaymentStatus::Pending.as_str().into(),
            provider_ref,
        })
        .returning(PaymentEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to create payment")?;

    Ok(StdResponse {
        data: Some(CreatePaymentRes {
            payment,
            instructions: method.instructions(),
        }),
        message: Some("Create payment successfully"),
    })
}

/// Fetch a single payment.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Payments"],
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "Payment ID to fetch")
    ),
    responses(
        (status = 200, description = "Get payment successfully", body = StdResponse<PaymentEntity, String>)
    )
)]
async fn get_payment(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let payment: PaymentEntity = payments::table
        .find(id)
        .get_result(conn)
        .await
        .map_err(|_| AppError::NotFound)?;

    Ok(StdResponse {
        data: Some(payment),
        message: Some("Get payment successfully"),
    })
}

/// The partial unique index on paid payments backstops the in-transaction
/// count: when two confirms race, the loser's UPDATE trips the index and
/// surfaces as the same error the count produces.
fn paid_conflict(err: diesel::result::Error) -> AppError {
    match err {
        diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        ) => AppError::BadRequest("Order already has a paid payment".into()),
        err => err.into(),
    }
}

#[derive(Serialize, ToSchema)]
struct ConfirmPaymentRes {
    pub updated_payment: PaymentEntity,
    pub updated_order: OrderEntity,
}

/// Confirm a pending payment: bank-transfer funds arrived or a COD parcel
/// was settled at the door.
///
/// Marks the payment `PAID` and advances the parent order in the same
/// transaction, so a `PAID` payment can never sit against an order still in
/// `pending`. Rejected if the order already carries another `PAID` payment.
#[utoipa::path(
    patch,
    path = "/{id}/confirm",
    tags = ["Payments"],
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "Payment ID to confirm")
    ),
    responses(
        (status = 200, description = "Payment confirmed", body = StdResponse<ConfirmPaymentRes, String>),
        (status = 400, description = "Payment is not pending, or the order already has a paid payment")
    )
)]
async fn confirm_payment(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let (updated_payment, updated_order) = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let payment: PaymentEntity = payments::table
                    .find(id)
                    .get_result(conn)
                    .await
                    .map_err(|_| AppError::NotFound)?;

                if domain::stored_payment_status(&payment.status)? != PaymentStatus::Pending {
                    return Err(AppError::BadRequest(format!(
                        "Payment in status {} cannot be confirmed",
                        payment.status
                    )));
                }

                let already_paid: i64 = payments::table
                    .filter(payments::order_id.eq(payment.order_id))
                    .filter(payments::status.eq(PaymentStatus::Paid.as_str()))
                    .count()
                    .get_result(conn)
                    .await
                    .context("Failed to count paid payments")?;
                if already_paid > 0 {
                    return Err(AppError::BadRequest(
                        "Order already has a paid payment".into(),
                    ));
                }

                let order: OrderEntity = orders::table
                    .find(payment.order_id)
                    .get_result(conn)
                    .await
                    .context("Failed to get order for payment")?;

                let provider = domain::stored_payment_provider(&payment.provider)?;
                let current = domain::stored_order_status(&order.status)?;
                let next = domain::advance_on_payment(current, provider)?;

                let updated_payment: PaymentEntity = diesel::update(
                    payments::table
                        .find(id)
                        .filter(payments::status.eq(PaymentStatus::Pending.as_str())),
                )
                .set((
                    payments::status.eq(PaymentStatus::Paid.as_str()),
                    payments::updated_at.eq(diesel::dsl::now),
                ))
                .returning(PaymentEntity::as_returning())
                .get_result(conn)
                .await
                .map_err(paid_conflict)?;

                let updated_order: OrderEntity = diesel::update(orders::table.find(order.id))
                    .set((
                        orders::status.eq(next.as_str()),
                        orders::updated_at.eq(diesel::dsl::now),
                    ))
                    .returning(OrderEntity::as_returning())
                    .get_result(conn)
                    .await
                    .context("Failed to update order status")?;

                Ok::<(PaymentEntity, OrderEntity), AppError>((updated_payment, updated_order))
            })
        })
        .await?;

    Ok(StdResponse {
        data: Some(ConfirmPaymentRes {
            updated_payment,
            updated_order,
        }),
        message: Some("Payment confirmed successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct FailPaymentReq {
    pub reason: Option<String>,
}

/// Mark a pending payment as failed. The order is left untouched; the
/// shopper can start another payment attempt.
#[utoipa::path(
    patch,
    path = "/{id}/fail",
    tags = ["Payments"],
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "Payment ID to mark as failed")
    ),
    request_body = FailPaymentReq,
    responses(
        (status = 200, description = "Payment marked as failed", body = StdResponse<PaymentEntity, String>)
    )
)]
async fn fail_payment(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<FailPaymentReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let updated: PaymentEntity = diesel::update(
        payments::table
            .find(id)
            .filter(payments::status.eq(PaymentStatus::Pending.as_str())),
    )
    .set((
        payments::status.eq(PaymentStatus::Failed.as_str()),
        payments::failure_reason.eq(body.reason),
        payments::updated_at.eq(diesel::dsl::now),
    ))
    .returning(PaymentEntity::as_returning())
    .get_result(conn)
    .await
    .map_err(|_| AppError::NotFound)?;

    Ok(StdResponse {
        data: Some(updated),
        message: Some("Payment marked as failed"),
    })
}

/// Refund a paid payment. The order status is not rolled back.
#[utoipa::path(
    patch,
    path = "/{id}/refund",
    tags = ["Payments"],
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "Payment ID to refund")
    ),
    responses(
        (status = 200, description = "Payment refunded", body = StdResponse<PaymentEntity, String>)
    )
)]
async fn refund_payment(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let updated: PaymentEntity = diesel::update(
        payments::table
            .find(id)
            .filter(payments::status.eq(PaymentStatus::Paid.as_str())),
    )
    .set((
        payments::status.eq(PaymentStatus::Refunded.as_str()),
        payments::updated_at.eq(diesel::dsl::now),
    ))
    .returning(PaymentEntity::as_returning())
    .get_result(conn)
    .await
    .map_err(|_| AppError::NotFound)?;

    Ok(StdResponse {
        data: Some(updated),
        message: Some("Payment refunded successfully"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    #[test]
    fn losing_a_confirm_race_reads_as_bad_request() {
        let err = DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            Box::new("duplicate key value violates unique constraint".to_string()),
        );
        match paid_conflict(err) {
            AppError::BadRequest(msg) => assert_eq!(msg, "Order already has a paid payment"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn other_database_errors_pass_through() {
        match paid_conflict(DieselError::NotFound) {
            AppError::NotFound => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
