use lazy_static::lazy_static;
use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry, Encoder,
    IntCounter, IntCounterVec, Registry, TextEncoder,
};

use crate::errors::ServiceError;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref CHECKOUTS_TOTAL: IntCounterVec = register_int_counter_vec_with_registry!(
        "storefront_checkouts_total",
        "Completed checkout calls by payment method",
        &["payment_method"],
        REGISTRY
    )
    .expect("checkout counter registration");
    pub static ref PAYMENTS_CAPTURED_TOTAL: IntCounter = register_int_counter_with_registry!(
        "storefront_payments_captured_total",
        "Payments captured across verify and webhook paths",
        REGISTRY
    )
    .expect("capture counter registration");
    pub static ref PAYMENTS_FAILED_TOTAL: IntCounter = register_int_counter_with_registry!(
        "storefront_payments_failed_total",
        "Payments marked failed",
        REGISTRY
    )
    .expect("failure counter registration");
    pub static ref WEBHOOK_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec_with_registry!(
        "storefront_webhook_events_total",
        "Inbound webhook events by type and verification outcome",
        &["event_type", "verified"],
        REGISTRY
    )
    .expect("webhook counter registration");
}

/// Render all registered metrics in Prometheus text format.
pub fn render() -> Result<String, ServiceError> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| ServiceError::InternalError(format!("metrics encoding: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| ServiceError::InternalError(format!("metrics encoding: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_render_in_text_format() {
        CHECKOUTS_TOTAL.with_label_values(&["cod"]).inc();
        PAYMENTS_CAPTURED_TOTAL.inc();
        WEBHOOK_EVENTS_TOTAL
            .with_label_values(&["payment.captured", "true"])
            .inc();

        let text = render().unwrap();
        assert!(text.contains("storefront_checkouts_total"));
        assert!(text.contains("storefront_payments_captured_total"));
    }
}
