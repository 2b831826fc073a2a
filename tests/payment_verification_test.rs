//! Integration tests for the synchronous payment verification path:
//! signature checking, idempotent capture and snapshot finalization.

mod common;

use common::{guest_identity, payment_signature, TestApp};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::json;
use storefront_api::{
    auth::ShopperIdentity,
    entities::{
        order::{OrderPaymentStatus, OrderStatus, PaymentMethod},
        order_item,
        payment::PaymentStatus,
        CartItem, Order, OrderItem, Payment,
    },
    errors::ServiceError,
    services::{
        checkout::{CheckoutInput, CheckoutOutcome},
        payments::{VerifyPaymentInput, SIGNATURE_MISMATCH},
    },
};
use wiremock::{
    matchers::{method, path},
    Mock, ResponseTemplate,
};

/// Seed a cart (product x qty at price), an address, and run an online
/// checkout against a mocked gateway order.
async fn setup_online_order(
    app: &TestApp,
    gateway_order_id: &str,
) -> (ShopperIdentity, CheckoutOutcome, uuid::Uuid) {
    let identity = guest_identity();
    let product = app.seed_product("Linen Kurta", dec!(500.00)).await;
    app.services
        .carts
        .add_item(
            &identity.owner,
            storefront_api::services::carts::AddItemInput {
                product_id: product.id,
                quantity: 2,
                size: Some("M".into()),
                color: None,
            },
        )
        .await
        .unwrap();
    let address = app
        .seed_address(&identity.owner, Some("guest@example.com"))
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": gateway_order_id,
            "amount": 100_000,
            "currency": "INR"
        })))
        .mount(&app.gateway_server)
        .await;

    let outcome = app
        .services
        .checkout
        .checkout(
            &identity,
            CheckoutInput {
                address_id: address.id,
                payment_method: PaymentMethod::Upi,
                cart_item_ids: None,
            },
        )
        .await
        .unwrap();

    (identity, outcome, product.id)
}

fn verify_input(gateway_order_id: &str, gateway_payment_id: &str) -> VerifyPaymentInput {
    VerifyPaymentInput {
        gateway_order_id: gateway_order_id.to_string(),
        gateway_payment_id: gateway_payment_id.to_string(),
        signature: payment_signature(gateway_order_id, gateway_payment_id),
    }
}

async fn mount_payment_details(app: &TestApp, payment_id: &str, order_id: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/payments/{}", payment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": payment_id,
            "order_id": order_id,
            "method": "upi",
            "status": "captured"
        })))
        .mount(&app.gateway_server)
        .await;
}

#[tokio::test]
async fn valid_signature_captures_and_finalizes() {
    let app = TestApp::new().await;
    let (identity, outcome, product_id) = setup_online_order(&app, "order_v1").await;
    mount_payment_details(&app, "pay_v1", "order_v1").await;

    // The shopper keeps shopping while paying: this later line must survive
    // finalization untouched.
    let stole = app.seed_product("Block-Print Stole", dec!(450.00)).await;
    app.services
        .carts
        .add_item(
            &identity.owner,
            storefront_api::services::carts::AddItemInput {
                product_id: stole.id,
                quantity: 1,
                size: None,
                color: None,
            },
        )
        .await
        .unwrap();

    let result = app
        .services
        .payments
        .verify_payment(verify_input("order_v1", "pay_v1"))
        .await
        .unwrap();
    assert_eq!(result.order_id, outcome.order_id);
    assert!(!result.already_verified);

    // Payment record is captured with ids, signature and gateway method.
    let record = Payment::find()
        .filter(storefront_api::entities::payment::Column::GatewayOrderId.eq("order_v1"))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, PaymentStatus::Captured);
    assert_eq!(record.gateway_payment_id.as_deref(), Some("pay_v1"));
    assert_eq!(record.payment_method.as_deref(), Some("upi"));

    // Order items materialized from the snapshot at the frozen price.
    let order = Order::find_by_id(outcome.order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert_eq!(order.payment_status, OrderPaymentStatus::Paid);
    assert!(order.cart_snapshot.is_none(), "snapshot consumed");

    let items = OrderItem::find()
        .filter(order_item::Column::OrderId.eq(order.id))
        .all(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].product_id, product_id);
    assert_eq!(items[0].quantity, 2);
    assert_eq!(items[0].price_at_purchase, dec!(500.00));

    // Only the snapshotted line was deleted; the stole added mid-payment
    // stays in the cart.
    let remaining = app
        .services
        .carts
        .load_cart_with_prices(&identity.owner, None)
        .await
        .unwrap();
    assert_eq!(remaining.items.len(), 1);
    assert_eq!(remaining.items[0].item.product_id, stole.id);
}

#[tokio::test]
async fn double_verification_is_a_noop_success() {
    let app = TestApp::new().await;
    let (_identity, outcome, _product) = setup_online_order(&app, "order_v2").await;
    mount_payment_details(&app, "pay_v2", "order_v2").await;

    let first = app
        .services
        .payments
        .verify_payment(verify_input("order_v2", "pay_v2"))
        .await
        .unwrap();
    assert!(!first.already_verified);

    let second = app
        .services
        .payments
        .verify_payment(verify_input("order_v2", "pay_v2"))
        .await
        .unwrap();
    assert!(second.already_verified);
    assert_eq!(second.order_id, outcome.order_id);

    // No duplicate order items from the retry.
    let items = OrderItem::find().count(&*app.state.db).await.unwrap();
    assert_eq!(items, 1);
}

#[tokio::test]
async fn invalid_signature_marks_payment_failed_and_leaves_order_alone() {
    let app = TestApp::new().await;
    let (_identity, outcome, _product) = setup_online_order(&app, "order_v3").await;

    let result = app
        .services
        .payments
        .verify_payment(VerifyPaymentInput {
            gateway_order_id: "order_v3".into(),
            gateway_payment_id: "pay_v3".into(),
            signature: "0".repeat(64),
        })
        .await;
    assert!(matches!(result, Err(ServiceError::InvalidSignature(_))));

    let record = Payment::find()
        .filter(storefront_api::entities::payment::Column::GatewayOrderId.eq("order_v3"))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, PaymentStatus::Failed);
    assert_eq!(record.failure_reason.as_deref(), Some(SIGNATURE_MISMATCH));

    // The order is exactly as checkout left it.
    let order = Order::find_by_id(outcome.order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, OrderPaymentStatus::Pending);
    assert!(order.cart_snapshot.is_some());
    let items = OrderItem::find().count(&*app.state.db).await.unwrap();
    assert_eq!(items, 0);
    let cart_lines = CartItem::find().count(&*app.state.db).await.unwrap();
    assert_eq!(cart_lines, 1);
}

#[tokio::test]
async fn failed_payment_cannot_be_captured_later() {
    let app = TestApp::new().await;
    let (_identity, _outcome, _product) = setup_online_order(&app, "order_v4").await;

    // Tampered attempt flips the record to failed.
    let _ = app
        .services
        .payments
        .verify_payment(VerifyPaymentInput {
            gateway_order_id: "order_v4".into(),
            gateway_payment_id: "pay_v4".into(),
            signature: "f".repeat(64),
        })
        .await;

    // Even a correctly signed retry cannot resurrect a failed record.
    mount_payment_details(&app, "pay_v4", "order_v4").await;
    let result = app
        .services
        .payments
        .verify_payment(verify_input("order_v4", "pay_v4"))
        .await;
    assert!(matches!(result, Err(ServiceError::PaymentFailed(_))));
}

#[tokio::test]
async fn unknown_gateway_order_is_not_found() {
    let app = TestApp::new().await;

    let result = app
        .services
        .payments
        .verify_payment(verify_input("order_never_created", "pay_x"))
        .await;
    assert!(matches!(result, Err(ServiceError::NotFound(_))));
}

#[tokio::test]
async fn capture_survives_gateway_detail_fetch_failure() {
    let app = TestApp::new().await;
    let (_identity, outcome, _product) = setup_online_order(&app, "order_v5").await;
    // No GET /v1/payments mock: the details fetch 404s, which must not block
    // the capture.

    let result = app
        .services
        .payments
        .verify_payment(verify_input("order_v5", "pay_v5"))
        .await
        .unwrap();
    assert_eq!(result.order_id, outcome.order_id);

    let record = Payment::find()
        .filter(storefront_api::entities::payment::Column::GatewayOrderId.eq("order_v5"))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, PaymentStatus::Captured);
    assert!(record.payment_method.is_none());
}

/// The worked example: one product at 500, quantity 2, paid via UPI.
#[tokio::test]
async fn upi_checkout_and_verify_end_to_end() {
    let app = TestApp::new().await;
    let (identity, outcome, product_id) = setup_online_order(&app, "order_e2e").await;
    mount_payment_details(&app, "pay_e2e", "order_e2e").await;

    assert_eq!(outcome.total_amount, dec!(1000.00));
    assert_eq!(outcome.amount_minor, Some(100_000));

    app.services
        .payments
        .verify_payment(verify_input("order_e2e", "pay_e2e"))
        .await
        .unwrap();

    let order = Order::find_by_id(outcome.order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);

    let items = OrderItem::find().all(&*app.state.db).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(
        (items[0].product_id, items[0].quantity, items[0].price_at_purchase),
        (product_id, 2, dec!(500.00))
    );

    let cart = app
        .services
        .carts
        .load_cart_with_prices(&identity.owner, None)
        .await
        .unwrap();
    assert!(cart.items.is_empty());
}
