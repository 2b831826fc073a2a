//! Integration tests for asynchronous webhook reconciliation and its
//! convergence with the synchronous verification path.

mod common;

use common::{guest_identity, hmac_hex, payment_signature, TestApp, TEST_WEBHOOK_SECRET};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::json;
use storefront_api::{
    auth::ShopperIdentity,
    entities::{
        order::{OrderPaymentStatus, OrderStatus, PaymentMethod},
        payment::PaymentStatus,
        Order, OrderItem, Payment, WebhookEvent,
    },
    errors::ServiceError,
    services::{
        checkout::{CheckoutInput, CheckoutOutcome},
        payments::VerifyPaymentInput,
    },
};
use wiremock::{
    matchers::{method, path},
    Mock, ResponseTemplate,
};

async fn setup_online_order(
    app: &TestApp,
    gateway_order_id: &str,
) -> (ShopperIdentity, CheckoutOutcome) {
    let identity = guest_identity();
    let product = app.seed_product("Linen Kurta", dec!(500.00)).await;
    app.services
        .carts
        .add_item(
            &identity.owner,
            storefront_api::services::carts::AddItemInput {
                product_id: product.id,
                quantity: 2,
                size: None,
                color: None,
            },
        )
        .await
        .unwrap();
    let address = app.seed_address(&identity.owner, None).await;

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
                payment_method: PaymentMethod::Card,
                cart_item_ids: None,
            },
        )
        .await
        .unwrap();

    (identity, outcome)
}

fn captured_event(gateway_order_id: &str, payment_id: &str) -> Vec<u8> {
    json!({
        "event": "payment.captured",
        "payload": {
            "payment": {
                "entity": {
                    "id": payment_id,
                    "order_id": gateway_order_id,
                    "method": "card"
                }
            }
        }
    })
    .to_string()
    .into_bytes()
}

fn sign(body: &[u8]) -> String {
    hmac_hex(TEST_WEBHOOK_SECRET, body)
}

async fn payment_record(
    app: &TestApp,
    gateway_order_id: &str,
) -> storefront_api::entities::payment::Model {
    Payment::find()
        .filter(storefront_api::entities::payment::Column::GatewayOrderId.eq(gateway_order_id))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn invalid_signature_is_logged_but_mutates_nothing() {
    let app = TestApp::new().await;
    let (_identity, _outcome) = setup_online_order(&app, "order_w1").await;

    let body = captured_event("order_w1", "pay_w1");
    let result = app
        .services
        .webhooks
        .process(&body, Some("deadbeef"))
        .await;
    assert!(matches!(result, Err(ServiceError::Unauthorized(_))));

    // Audit row exists, unverified and unprocessed.
    let events = WebhookEvent::find().all(&*app.state.db).await.unwrap();
    assert_eq!(events.len(), 1);
    assert!(!events[0].verified);
    assert!(!events[0].processed);
    assert_eq!(events[0].event_type, "payment.captured");

    // Payment and order state untouched.
    let record = payment_record(&app, "order_w1").await;
    assert_eq!(record.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn missing_signature_is_rejected_and_logged() {
    let app = TestApp::new().await;
    let body = captured_event("order_unknown", "pay_x");

    let result = app.services.webhooks.process(&body, None).await;
    assert!(matches!(result, Err(ServiceError::Unauthorized(_))));

    let events = WebhookEvent::find().all(&*app.state.db).await.unwrap();
    assert_eq!(events.len(), 1);
    assert!(!events[0].verified);
}

#[tokio::test]
async fn captured_event_finalizes_the_order() {
    let app = TestApp::new().await;
    let (identity, outcome) = setup_online_order(&app, "order_w2").await;

    let body = captured_event("order_w2", "pay_w2");
    let result = app
        .services
        .webhooks
        .process(&body, Some(&sign(&body)))
        .await
        .unwrap();
    assert_eq!(result.event_type, "payment.captured");

    let record = payment_record(&app, "order_w2").await;
    assert_eq!(record.status, PaymentStatus::Captured);
    assert_eq!(record.gateway_payment_id.as_deref(), Some("pay_w2"));
    assert_eq!(record.payment_method.as_deref(), Some("card"));

    let order = Order::find_by_id(outcome.order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert_eq!(order.payment_status, OrderPaymentStatus::Paid);
    assert!(order.cart_snapshot.is_none());

    let items = OrderItem::find().count(&*app.state.db).await.unwrap();
    assert_eq!(items, 1);
    let cart = app
        .services
        .carts
        .load_cart_with_prices(&identity.owner, None)
        .await
        .unwrap();
    assert!(cart.items.is_empty());

    // Audit row flipped to processed.
    let events = WebhookEvent::find().all(&*app.state.db).await.unwrap();
    assert!(events[0].verified);
    assert!(events[0].processed);
    assert!(events[0].processed_at.is_some());
}

#[tokio::test]
async fn webhook_after_verify_converges_without_duplicates() {
    let app = TestApp::new().await;
    let (_identity, _outcome) = setup_online_order(&app, "order_w3").await;

    // Synchronous verification wins the race.
    app.services
        .payments
        .verify_payment(VerifyPaymentInput {
            gateway_order_id: "order_w3".into(),
            gateway_payment_id: "pay_w3".into(),
            signature: payment_signature("order_w3", "pay_w3"),
        })
        .await
        .unwrap();

    // The late webhook is acknowledged and changes nothing.
    let body = captured_event("order_w3", "pay_w3");
    app.services
        .webhooks
        .process(&body, Some(&sign(&body)))
        .await
        .unwrap();

    let items = OrderItem::find().count(&*app.state.db).await.unwrap();
    assert_eq!(items, 1, "no duplicate order items from the webhook");
    let record = payment_record(&app, "order_w3").await;
    assert_eq!(record.status, PaymentStatus::Captured);
}

#[tokio::test]
async fn verify_after_webhook_short_circuits() {
    let app = TestApp::new().await;
    let (_identity, outcome) = setup_online_order(&app, "order_w4").await;

    let body = captured_event("order_w4", "pay_w4");
    app.services
        .webhooks
        .process(&body, Some(&sign(&body)))
        .await
        .unwrap();

    let result = app
        .services
        .payments
        .verify_payment(VerifyPaymentInput {
            gateway_order_id: "order_w4".into(),
            gateway_payment_id: "pay_w4".into(),
            signature: payment_signature("order_w4", "pay_w4"),
        })
        .await
        .unwrap();
    assert!(result.already_verified);
    assert_eq!(result.order_id, outcome.order_id);
}

#[tokio::test]
async fn authorized_event_advances_without_finalizing() {
    let app = TestApp::new().await;
    let (_identity, outcome) = setup_online_order(&app, "order_w5").await;

    let body = json!({
        "event": "payment.authorized",
        "payload": {
            "payment": { "entity": { "id": "pay_w5", "order_id": "order_w5" } }
        }
    })
    .to_string()
    .into_bytes();
    app.services
        .webhooks
        .process(&body, Some(&sign(&body)))
        .await
        .unwrap();

    let record = payment_record(&app, "order_w5").await;
    assert_eq!(record.status, PaymentStatus::Authorized);

    // Authorization alone must not finalize the order.
    let order = Order::find_by_id(outcome.order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert!(order.cart_snapshot.is_some());
}

#[tokio::test]
async fn failed_event_cancels_the_pending_order() {
    let app = TestApp::new().await;
    let (_identity, outcome) = setup_online_order(&app, "order_w6").await;

    let body = json!({
        "event": "payment.failed",
        "payload": {
            "payment": {
                "entity": {
                    "id": "pay_w6",
                    "order_id": "order_w6",
                    "error_description": "card declined"
                }
            }
        }
    })
    .to_string()
    .into_bytes();
    app.services
        .webhooks
        .process(&body, Some(&sign(&body)))
        .await
        .unwrap();

    let record = payment_record(&app, "order_w6").await;
    assert_eq!(record.status, PaymentStatus::Failed);
    assert_eq!(record.failure_reason.as_deref(), Some("card declined"));

    let order = Order::find_by_id(outcome.order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(order.payment_status, OrderPaymentStatus::Failed);
}

#[tokio::test]
async fn failed_event_after_capture_never_regresses() {
    let app = TestApp::new().await;
    let (_identity, outcome) = setup_online_order(&app, "order_w7").await;

    let captured = captured_event("order_w7", "pay_w7");
    app.services
        .webhooks
        .process(&captured, Some(&sign(&captured)))
        .await
        .unwrap();

    let failed = json!({
        "event": "payment.failed",
        "payload": {
            "payment": {
                "entity": { "id": "pay_w7", "order_id": "order_w7" }
            }
        }
    })
    .to_string()
    .into_bytes();
    app.services
        .webhooks
        .process(&failed, Some(&sign(&failed)))
        .await
        .unwrap();

    // Captured is terminal; the stale failure changes nothing.
    let record = payment_record(&app, "order_w7").await;
    assert_eq!(record.status, PaymentStatus::Captured);
    let order = Order::find_by_id(outcome.order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert_eq!(order.payment_status, OrderPaymentStatus::Paid);
}

#[tokio::test]
async fn order_paid_event_finalizes_via_order_entity() {
    let app = TestApp::new().await;
    let (_identity, outcome) = setup_online_order(&app, "order_w8").await;

    let body = json!({
        "event": "order.paid",
        "payload": {
            "order": { "entity": { "id": "order_w8" } }
        }
    })
    .to_string()
    .into_bytes();
    app.services
        .webhooks
        .process(&body, Some(&sign(&body)))
        .await
        .unwrap();

    let order = Order::find_by_id(outcome.order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert_eq!(order.payment_status, OrderPaymentStatus::Paid);
}

#[tokio::test]
async fn unknown_event_types_are_acknowledged() {
    let app = TestApp::new().await;

    let body = json!({
        "event": "refund.created",
        "payload": {}
    })
    .to_string()
    .into_bytes();
    let result = app
        .services
        .webhooks
        .process(&body, Some(&sign(&body)))
        .await
        .unwrap();
    assert_eq!(result.event_type, "refund.created");

    let events = WebhookEvent::find().all(&*app.state.db).await.unwrap();
    assert_eq!(events.len(), 1);
    assert!(events[0].verified);
    assert!(events[0].processed, "unknown types still mark processed");
}

#[tokio::test]
async fn webhook_for_unknown_gateway_order_is_acknowledged() {
    let app = TestApp::new().await;

    let body = captured_event("order_never_seen", "pay_x");
    let result = app
        .services
        .webhooks
        .process(&body, Some(&sign(&body)))
        .await;
    assert!(result.is_ok(), "gateway retries are not provoked");
}
