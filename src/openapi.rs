use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// OpenAPI document for the payment-facing surface. The cart and order
/// routes are first-party only and intentionally undocumented here.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "storefront-api",
        description = "Checkout, payment verification and gateway webhooks"
    ),
    paths(
        crate::handlers::payments::verify_payment,
        crate::handlers::payment_webhooks::payment_webhook,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::handlers::payments::VerifyPaymentRequest,
        crate::handlers::payments::VerifyPaymentResponse,
    )),
    tags(
        (name = "Payments", description = "Payment verification and webhook reconciliation")
    )
)]
pub struct ApiDoc;

/// Swagger UI mounted at /docs
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
