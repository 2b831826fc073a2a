use crate::handlers::common::created_response;
use crate::{
    auth::ShopperIdentity,
    entities::order::PaymentMethod,
    errors::ServiceError,
    services::checkout::{CheckoutInput, CheckoutOutcome},
    AppState,
};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::post,
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Creates the router for checkout
pub fn checkout_routes() -> Router<AppState> {
    Router::new().route("/", post(checkout))
}

/// Place an order from the caller's cart.
///
/// COD confirms immediately; card/UPI returns the gateway order the browser
/// needs to complete payment.
async fn checkout(
    State(state): State<AppState>,
    identity: ShopperIdentity,
    Json(payload): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let input = CheckoutInput {
        address_id: payload.address_id,
        payment_method: payload.payment_method,
        cart_item_ids: payload.cart_item_ids,
    };

    let outcome = state.services.checkout.checkout(&identity, input).await?;
    Ok(created_response(CheckoutResponse::from(outcome)))
}

fn default_payment_method() -> PaymentMethod {
    PaymentMethod::Cod
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub address_id: Uuid,
    #[serde(default = "default_payment_method")]
    pub payment_method: PaymentMethod,
    pub cart_item_ids: Option<Vec<Uuid>>,
}

/// Wire shape of a successful checkout, matching the storefront contract.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub success: bool,
    pub order_id: Uuid,
    pub order_number: String,
    pub total_amount: Decimal,
    pub currency: String,
    pub requires_payment: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_order_id: Option<String>,
    /// Minor units (paise), as the payment widget expects
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl From<CheckoutOutcome> for CheckoutResponse {
    fn from(outcome: CheckoutOutcome) -> Self {
        Self {
            success: true,
            order_id: outcome.order_id,
            order_number: outcome.order_number,
            total_amount: outcome.total_amount,
            currency: outcome.currency,
            requires_payment: outcome.requires_payment,
            gateway_order_id: outcome.gateway_order_id,
            amount: outcome.amount_minor,
            key: outcome.key_id,
        }
    }
}
