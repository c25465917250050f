//! Card payment gateway collaborator. The gateway owns the card flow end to
//! end; this service only registers an intent and stores the returned
//! reference on the payment row.

use anyhow::Context;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{api::ApiUrls, core::app_error::AppError};

#[derive(Serialize)]
struct CreateIntentReq {
    order_id: i32,
    amount: f32,
    currency: &'static str,
}

#[derive(Deserialize)]
struct CreateIntentRes {
    reference: String,
}

/// Register a payment intent with the card gateway and return its reference.
/// An unreachable gateway surfaces as 503, not a generic internal error.
pub async fn create_payment_intent(
    client: Client,
    order_id: i32,
    amount: f32,
) -> Result<String, AppError> {
    let url = ApiUrls::get_payment_gateway_url();
    let res: CreateIntentRes = client
        .post(format!("{}/payment-intents", url))
        .json(&CreateIntentReq {
            order_id,
            amount,
            currency: "usd",
        })
        .send()
        .await
        .map_err(|_| AppError::ServiceUnreachable("PaymentGateway".into()))?
        .json()
        .await
        .context("Failed to parse gateway response")?;

    Ok(res.reference)
}
