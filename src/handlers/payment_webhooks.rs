use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use bytes::Bytes;
use serde_json::json;

use crate::{errors::ServiceError, AppState};

/// Signature headers accepted on webhook deliveries, in preference order.
const SIGNATURE_HEADERS: [&str; 2] = ["x-razorpay-signature", "x-webhook-signature"];

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let signature = SIGNATURE_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|value| value.to_str().ok());

    let outcome = state.services.webhooks.process(&body, signature).await?;

    Ok(Json(json!({
        "received": true,
        "eventType": outcome.event_type
    })))
}
