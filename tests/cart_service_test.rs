//! Integration tests for cart resolution, line merging and guest cart
//! migration, driven against in-memory SQLite.

mod common;

use common::{guest_identity, user_identity, TestApp};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use storefront_api::{
    entities::{cart, Cart},
    errors::ServiceError,
    services::carts::AddItemInput,
};

fn add_input(
    product_id: uuid::Uuid,
    quantity: i32,
    size: Option<&str>,
    color: Option<&str>,
) -> AddItemInput {
    AddItemInput {
        product_id,
        quantity,
        size: size.map(str::to_string),
        color: color.map(str::to_string),
    }
}

#[tokio::test]
async fn get_or_create_cart_is_idempotent_per_owner() {
    let app = TestApp::new().await;
    let identity = guest_identity();

    let first = app
        .services
        .carts
        .get_or_create_cart(&identity.owner)
        .await
        .unwrap();
    let second = app
        .services
        .carts
        .get_or_create_cart(&identity.owner)
        .await
        .unwrap();

    assert_eq!(first.id, second.id);

    let count = Cart::find().count(&*app.state.db).await.unwrap();
    assert_eq!(count, 1, "exactly one cart row for the owner");
}

#[tokio::test]
async fn distinct_owners_get_distinct_carts() {
    let app = TestApp::new().await;
    let guest = guest_identity();
    let user = user_identity(None);

    let guest_cart = app
        .services
        .carts
        .get_or_create_cart(&guest.owner)
        .await
        .unwrap();
    let user_cart = app
        .services
        .carts
        .get_or_create_cart(&user.owner)
        .await
        .unwrap();

    assert_ne!(guest_cart.id, user_cart.id);
    assert!(user_cart.user_id.is_some());
    assert!(user_cart.guest_id.is_none());
    assert!(guest_cart.guest_id.is_some());
}

#[tokio::test]
async fn adding_same_variant_twice_increments_quantity() {
    let app = TestApp::new().await;
    let identity = guest_identity();
    let product = app.seed_product("Linen Kurta", dec!(999.00)).await;

    app.services
        .carts
        .add_item(&identity.owner, add_input(product.id, 2, Some("M"), None))
        .await
        .unwrap();
    let view = app
        .services
        .carts
        .add_item(&identity.owner, add_input(product.id, 3, Some("M"), None))
        .await
        .unwrap();

    assert_eq!(view.items.len(), 1, "merged into a single line");
    assert_eq!(view.items[0].item.quantity, 5);
    assert_eq!(view.total, dec!(4995.00));
}

#[tokio::test]
async fn different_size_creates_distinct_line() {
    let app = TestApp::new().await;
    let identity = guest_identity();
    let product = app.seed_product("Linen Kurta", dec!(999.00)).await;

    app.services
        .carts
        .add_item(&identity.owner, add_input(product.id, 1, Some("M"), None))
        .await
        .unwrap();
    let view = app
        .services
        .carts
        .add_item(&identity.owner, add_input(product.id, 1, Some("L"), None))
        .await
        .unwrap();

    assert_eq!(view.items.len(), 2);
    assert!(view.items.iter().all(|i| i.item.quantity == 1));
}

#[tokio::test]
async fn cart_prices_follow_the_live_catalog() {
    let app = TestApp::new().await;
    let identity = guest_identity();
    let product = app.seed_product("Block-Print Stole", dec!(450.00)).await;

    let view = app
        .services
        .carts
        .add_item(&identity.owner, add_input(product.id, 2, None, None))
        .await
        .unwrap();
    assert_eq!(view.total, dec!(900.00));
    assert_eq!(view.items[0].unit_price, dec!(450.00));
}

#[tokio::test]
async fn inactive_products_cannot_be_added() {
    let app = TestApp::new().await;
    let identity = guest_identity();
    let product = app.seed_product("Retired Style", dec!(100.00)).await;

    use sea_orm::{ActiveModelTrait, Set};
    let mut active: storefront_api::entities::product::ActiveModel = product.clone().into();
    active.is_active = Set(false);
    active.update(&*app.state.db).await.unwrap();

    let result = app
        .services
        .carts
        .add_item(&identity.owner, add_input(product.id, 1, None, None))
        .await;
    assert!(matches!(result, Err(ServiceError::InvalidOperation(_))));
}

#[tokio::test]
async fn quantity_zero_removes_the_line() {
    let app = TestApp::new().await;
    let identity = guest_identity();
    let product = app.seed_product("Linen Kurta", dec!(999.00)).await;

    let view = app
        .services
        .carts
        .add_item(&identity.owner, add_input(product.id, 2, None, None))
        .await
        .unwrap();
    let item_id = view.items[0].item.id;

    let view = app
        .services
        .carts
        .update_item_quantity(&identity.owner, item_id, 0)
        .await
        .unwrap();
    assert!(view.items.is_empty());
}

#[tokio::test]
async fn items_cannot_be_touched_across_owners() {
    let app = TestApp::new().await;
    let alice = guest_identity();
    let mallory = guest_identity();
    let product = app.seed_product("Linen Kurta", dec!(999.00)).await;

    let view = app
        .services
        .carts
        .add_item(&alice.owner, add_input(product.id, 1, None, None))
        .await
        .unwrap();
    let item_id = view.items[0].item.id;

    // Mallory has a cart of her own but must not reach Alice's line.
    app.services
        .carts
        .get_or_create_cart(&mallory.owner)
        .await
        .unwrap();
    let result = app
        .services
        .carts
        .update_item_quantity(&mallory.owner, item_id, 5)
        .await;
    assert!(matches!(result, Err(ServiceError::Forbidden(_))));
}

#[tokio::test]
async fn merge_folds_guest_lines_into_user_cart() {
    let app = TestApp::new().await;
    let guest = guest_identity();
    let user = user_identity(Some("asha@example.com"));
    let kurta = app.seed_product("Linen Kurta", dec!(999.00)).await;
    let stole = app.seed_product("Block-Print Stole", dec!(450.00)).await;

    // Guest has 2x kurta (M) and a stole; user already has 1x kurta (M).
    app.services
        .carts
        .add_item(&guest.owner, add_input(kurta.id, 2, Some("M"), None))
        .await
        .unwrap();
    app.services
        .carts
        .add_item(&guest.owner, add_input(stole.id, 1, None, None))
        .await
        .unwrap();
    app.services
        .carts
        .add_item(&user.owner, add_input(kurta.id, 1, Some("M"), None))
        .await
        .unwrap();

    let guest_id = guest.owner.guest_id().unwrap().to_string();
    let user_id = user.owner.user_id().unwrap();
    let merged = app
        .services
        .carts
        .merge_guest_cart(user_id, &guest_id)
        .await
        .unwrap();
    assert!(merged.is_some());

    let view = app
        .services
        .carts
        .load_cart_with_prices(&user.owner, None)
        .await
        .unwrap();
    assert_eq!(view.items.len(), 2);
    let kurta_line = view
        .items
        .iter()
        .find(|i| i.item.product_id == kurta.id)
        .unwrap();
    assert_eq!(kurta_line.item.quantity, 3, "duplicate variant lines fold");

    // Guest cart is gone.
    let guest_carts = Cart::find()
        .filter(cart::Column::GuestId.eq(guest_id))
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(guest_carts, 0);
}

#[tokio::test]
async fn merge_without_guest_cart_is_a_noop() {
    let app = TestApp::new().await;
    let user = user_identity(None);

    let merged = app
        .services
        .carts
        .merge_guest_cart(user.owner.user_id().unwrap(), "never-seen-guest")
        .await
        .unwrap();
    assert!(merged.is_none());
}

#[tokio::test]
async fn subset_load_filters_to_requested_lines() {
    let app = TestApp::new().await;
    let identity = guest_identity();
    let kurta = app.seed_product("Linen Kurta", dec!(999.00)).await;
    let stole = app.seed_product("Block-Print Stole", dec!(450.00)).await;

    app.services
        .carts
        .add_item(&identity.owner, add_input(kurta.id, 1, None, None))
        .await
        .unwrap();
    let view = app
        .services
        .carts
        .add_item(&identity.owner, add_input(stole.id, 1, None, None))
        .await
        .unwrap();

    let stole_line = view
        .items
        .iter()
        .find(|i| i.item.product_id == stole.id)
        .unwrap()
        .item
        .id;

    let subset = app
        .services
        .carts
        .load_cart_with_prices(&identity.owner, Some(&[stole_line]))
        .await
        .unwrap();
    assert_eq!(subset.items.len(), 1);
    assert_eq!(subset.total, dec!(450.00));
}
