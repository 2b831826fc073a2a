use crate::handlers::common::success_response;
use crate::{
    errors::ServiceError,
    services::payments::{VerifyOutcome, VerifyPaymentInput},
    AppState,
};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Creates the router for payment endpoints
pub fn payment_routes() -> Router<AppState> {
    Router::new().route("/verify", post(verify_payment))
}

/// Verify a gateway payment callback and finalize the paid order
#[utoipa::path(
    post,
    path = "/api/v1/payments/verify",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Payment verified", body = VerifyPaymentResponse),
        (status = 400, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown gateway order", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    Json(payload): Json<VerifyPaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let input = VerifyPaymentInput {
        gateway_order_id: payload.gateway_order_id,
        gateway_payment_id: payload.gateway_payment_id,
        signature: payload.signature,
    };

    let outcome = state.services.payments.verify_payment(input).await?;
    Ok(success_response(VerifyPaymentResponse::from(outcome)))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "gatewayOrderId": "order_NXhj4aAbcD12Ef",
    "gatewayPaymentId": "pay_NXhkR9QqWw34Gh",
    "signature": "2fb1f2d0a8c9..."
}))]
pub struct VerifyPaymentRequest {
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentResponse {
    pub success: bool,
    pub order_id: Uuid,
    pub message: String,
}

impl From<VerifyOutcome> for VerifyPaymentResponse {
    fn from(outcome: VerifyOutcome) -> Self {
        let message = if outcome.already_verified {
            "Payment already verified".to_string()
        } else {
            "Payment verified successfully".to_string()
        };
        Self {
            success: true,
            order_id: outcome.order_id,
            message,
        }
    }
}
