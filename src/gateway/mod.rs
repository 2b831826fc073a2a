use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{instrument, warn};

use crate::{config::AppConfig, errors::ServiceError};

type HmacSha256 = Hmac<Sha256>;

/// Client for the payment gateway's REST API plus its two signature schemes:
/// the `orderId|paymentId` digest returned to browsers after a successful
/// payment, and the raw-body digest on pushed webhook events.
#[derive(Debug, Clone)]
pub struct PaymentGateway {
    http: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
    webhook_secret: String,
}

/// Gateway order as returned by the create-order call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    /// Amount in minor units (paise)
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub receipt: Option<String>,
}

/// Payment details fetched from the gateway after capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPaymentDetails {
    pub id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
}

impl PaymentGateway {
    pub fn from_config(cfg: &AppConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.gateway_timeout_secs))
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("failed to build gateway client: {}", e))
            })?;

        Ok(Self {
            http,
            base_url: cfg.gateway_base_url.trim_end_matches('/').to_string(),
            key_id: cfg.gateway_key_id.clone(),
            key_secret: cfg.gateway_key_secret.clone(),
            webhook_secret: cfg.gateway_webhook_secret.clone(),
        })
    }

    /// Public key id, handed to browser clients so they can open the payment
    /// widget against the right account.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Create a gateway order for `amount_minor` minor units (paise).
    #[instrument(skip(self))]
    pub async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, ServiceError> {
        let url = format!("{}/v1/orders", self.base_url);
        let body = CreateOrderBody {
            amount: amount_minor,
            currency,
            receipt,
        };

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("gateway order: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            warn!(%status, "Gateway order creation rejected: {}", detail);
            return Err(ServiceError::ExternalServiceError(format!(
                "gateway order creation failed with status {}",
                status
            )));
        }

        response
            .json::<GatewayOrder>()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("gateway order body: {}", e)))
    }

    /// Fetch payment details by gateway payment id.
    #[instrument(skip(self))]
    pub async fn fetch_payment(
        &self,
        payment_id: &str,
    ) -> Result<GatewayPaymentDetails, ServiceError> {
        let url = format!("{}/v1/payments/{}", self.base_url, payment_id);

        let response = self
            .http
            .get(&url)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("gateway payment: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "gateway payment fetch failed with status {}",
                response.status()
            )));
        }

        response.json::<GatewayPaymentDetails>().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("gateway payment body: {}", e))
        })
    }

    /// Expected hex digest for a completed browser payment:
    /// HMAC-SHA256 over `"{gateway_order_id}|{gateway_payment_id}"`.
    pub fn expected_payment_signature(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
    ) -> Result<String, ServiceError> {
        hmac_sha256_hex(
            self.key_secret.as_bytes(),
            format!("{}|{}", gateway_order_id, gateway_payment_id).as_bytes(),
        )
    }

    /// Constant-time check of a browser-supplied payment signature.
    pub fn verify_payment_signature(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        supplied: &str,
    ) -> Result<bool, ServiceError> {
        let expected = self.expected_payment_signature(gateway_order_id, gateway_payment_id)?;
        Ok(constant_time_eq(&expected, supplied))
    }

    /// Constant-time check of a webhook signature over the raw request body.
    pub fn verify_webhook_signature(
        &self,
        raw_body: &[u8],
        supplied: &str,
    ) -> Result<bool, ServiceError> {
        let expected = hmac_sha256_hex(self.webhook_secret.as_bytes(), raw_body)?;
        Ok(constant_time_eq(&expected, supplied))
    }
}

fn hmac_sha256_hex(secret: &[u8], message: &[u8]) -> Result<String, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| ServiceError::InternalError(format!("hmac init: {}", e)))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
