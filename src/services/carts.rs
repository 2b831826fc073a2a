use crate::{
    auth::OwnerKey,
    entities::{cart, cart_item, product, Cart, CartItem, Product},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::SimpleExpr, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, EntityTrait, QueryFilter, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Cart service: one open cart per owner, lazily created, line items merged
/// by (product, size, color).
///
/// The cart never stores prices. `load_cart_with_prices` joins the live
/// catalog; only checkout freezes prices into an order snapshot.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Find the owner's cart without creating one.
    pub async fn find_cart(&self, owner: &OwnerKey) -> Result<Option<cart::Model>, ServiceError> {
        Ok(Cart::find()
            .filter(owner_condition(owner))
            .one(&*self.db)
            .await?)
    }

    /// Resolve the single open cart for an owner, creating it on first use.
    ///
    /// Safe under concurrent first-add races: the owner columns carry unique
    /// indexes, so the losing insert surfaces a unique violation and we
    /// re-read the winner's row instead of erroring.
    #[instrument(skip(self))]
    pub async fn get_or_create_cart(&self, owner: &OwnerKey) -> Result<cart::Model, ServiceError> {
        if let Some(existing) = self.find_cart(owner).await? {
            return Ok(existing);
        }

        let cart_id = Uuid::new_v4();
        let now = Utc::now();
        let new_cart = cart::ActiveModel {
            id: Set(cart_id),
            user_id: Set(owner.user_id()),
            guest_id: Set(owner.guest_id().map(str::to_string)),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match new_cart.insert(&*self.db).await {
            Ok(created) => {
                self.event_sender.send_or_log(Event::CartCreated(cart_id)).await;
                info!("Created cart {} for {:?}", cart_id, owner);
                Ok(created)
            }
            Err(err) if is_unique_violation(&err) => {
                // Lost the create race; the other request's cart is ours too.
                self.find_cart(owner).await?.ok_or_else(|| {
                    ServiceError::InternalError(
                        "cart insert conflicted but no cart exists for owner".to_string(),
                    )
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Add an item to the owner's cart, merging into an existing
    /// (product, size, color) line when present. Stock is not validated here;
    /// checkout is the gate.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        owner: &OwnerKey,
        input: AddItemInput,
    ) -> Result<CartWithItems, ServiceError> {
        input.validate()?;
        let cart = self.get_or_create_cart(owner).await?;

        let txn = self.db.begin().await?;

        let product = Product::find_by_id(input.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", input.product_id))
            })?;
        if !product.is_active {
            return Err(ServiceError::InvalidOperation(format!(
                "Product {} is not available",
                product.id
            )));
        }

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(input.product_id))
            .filter(variant_eq(cart_item::Column::Size, &input.size))
            .filter(variant_eq(cart_item::Column::Color, &input.color))
            .one(&txn)
            .await?;

        if let Some(item) = existing {
            let quantity = item.quantity + input.quantity;
            let mut item: cart_item::ActiveModel = item.into();
            item.quantity = Set(quantity);
            item.updated_at = Set(Utc::now());
            item.update(&txn).await?;
        } else {
            let now = Utc::now();
            cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(input.product_id),
                quantity: Set(input.quantity),
                size: Set(input.size.clone()),
                color: Set(input.color.clone()),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        touch_cart(&txn, &cart).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: cart.id,
                product_id: input.product_id,
            })
            .await;

        info!(
            "Added product {} x{} to cart {}",
            input.product_id, input.quantity, cart.id
        );
        self.load_cart_with_prices(owner, None).await
    }

    /// Update a line's quantity; zero or negative removes the line.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        owner: &OwnerKey,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartWithItems, ServiceError> {
        let cart = self
            .find_cart(owner)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?;

        let item = CartItem::find_by_id(item_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart item {} not found", item_id)))?;
        if item.cart_id != cart.id {
            return Err(ServiceError::Forbidden(
                "Item does not belong to this cart".to_string(),
            ));
        }

        if quantity <= 0 {
            CartItem::delete_by_id(item_id).exec(&*self.db).await?;
            self.event_sender
                .send_or_log(Event::CartItemRemoved {
                    cart_id: cart.id,
                    item_id,
                })
                .await;
        } else {
            let mut item: cart_item::ActiveModel = item.into();
            item.quantity = Set(quantity);
            item.updated_at = Set(Utc::now());
            item.update(&*self.db).await?;
            self.event_sender
                .send_or_log(Event::CartItemUpdated {
                    cart_id: cart.id,
                    item_id,
                })
                .await;
        }

        self.load_cart_with_prices(owner, None).await
    }

    /// Remove a line outright.
    pub async fn remove_item(
        &self,
        owner: &OwnerKey,
        item_id: Uuid,
    ) -> Result<CartWithItems, ServiceError> {
        self.update_item_quantity(owner, item_id, 0).await
    }

    /// Load the owner's cart lines joined to live catalog prices, optionally
    /// restricted to a subset of cart item ids.
    #[instrument(skip(self))]
    pub async fn load_cart_with_prices(
        &self,
        owner: &OwnerKey,
        subset: Option<&[Uuid]>,
    ) -> Result<CartWithItems, ServiceError> {
        let cart = self
            .find_cart(owner)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?;

        let items = load_priced_items(&*self.db, cart.id, subset).await?;
        Ok(CartWithItems::new(cart, items))
    }

    /// Fold a guest cart into the user's cart on login: matching
    /// (product, size, color) lines increment quantity, others move over,
    /// and the guest cart row is deleted.
    #[instrument(skip(self))]
    pub async fn merge_guest_cart(
        &self,
        user_id: Uuid,
        guest_id: &str,
    ) -> Result<Option<cart::Model>, ServiceError> {
        let guest_owner = OwnerKey::Guest(guest_id.to_string());
        let Some(guest_cart) = self.find_cart(&guest_owner).await? else {
            return Ok(None);
        };

        let user_cart = self.get_or_create_cart(&OwnerKey::User(user_id)).await?;

        let txn = self.db.begin().await?;

        let guest_items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(guest_cart.id))
            .all(&txn)
            .await?;

        for item in guest_items {
            let existing = CartItem::find()
                .filter(cart_item::Column::CartId.eq(user_cart.id))
                .filter(cart_item::Column::ProductId.eq(item.product_id))
                .filter(variant_eq(cart_item::Column::Size, &item.size))
                .filter(variant_eq(cart_item::Column::Color, &item.color))
                .one(&txn)
                .await?;

            match existing {
                Some(line) => {
                    let quantity = line.quantity + item.quantity;
                    let mut line: cart_item::ActiveModel = line.into();
                    line.quantity = Set(quantity);
                    line.updated_at = Set(Utc::now());
                    line.update(&txn).await?;
                    CartItem::delete_by_id(item.id).exec(&txn).await?;
                }
                None => {
                    let mut moved: cart_item::ActiveModel = item.into();
                    moved.cart_id = Set(user_cart.id);
                    moved.updated_at = Set(Utc::now());
                    moved.update(&txn).await?;
                }
            }
        }

        Cart::delete_by_id(guest_cart.id).exec(&txn).await?;
        touch_cart(&txn, &user_cart).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartsMerged {
                user_cart_id: user_cart.id,
                guest_cart_id: guest_cart.id,
            })
            .await;

        info!(
            "Merged guest cart {} into user cart {}",
            guest_cart.id, user_cart.id
        );
        Ok(Some(user_cart))
    }
}

/// Cart lines joined to live prices, shared between the cart view and
/// checkout's total computation.
pub async fn load_priced_items(
    conn: &impl ConnectionTrait,
    cart_id: Uuid,
    subset: Option<&[Uuid]>,
) -> Result<Vec<PricedCartItem>, ServiceError> {
    let mut query = CartItem::find().filter(cart_item::Column::CartId.eq(cart_id));
    if let Some(ids) = subset {
        query = query.filter(cart_item::Column::Id.is_in(ids.iter().copied()));
    }

    let rows = query.find_also_related(Product).all(conn).await?;

    rows.into_iter()
        .map(|(item, product)| {
            let product = product.ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "cart item {} references missing product {}",
                    item.id, item.product_id
                ))
            })?;
            Ok(PricedCartItem::new(item, &product))
        })
        .collect()
}

fn owner_condition(owner: &OwnerKey) -> Condition {
    match owner {
        OwnerKey::User(id) => Condition::all().add(cart::Column::UserId.eq(*id)),
        OwnerKey::Guest(id) => Condition::all().add(cart::Column::GuestId.eq(id.clone())),
    }
}

/// Equality filter that treats a missing variant attribute as SQL NULL.
fn variant_eq(column: cart_item::Column, value: &Option<String>) -> SimpleExpr {
    match value {
        Some(v) => column.eq(v.clone()),
        None => column.is_null(),
    }
}

fn is_unique_violation(err: &sea_orm::DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

async fn touch_cart(
    conn: &impl ConnectionTrait,
    cart: &cart::Model,
) -> Result<(), ServiceError> {
    let mut active: cart::ActiveModel = cart.clone().into();
    active.updated_at = Set(Utc::now());
    active.update(conn).await?;
    Ok(())
}

/// Input for adding an item to the cart
#[derive(Debug, Deserialize, Validate)]
pub struct AddItemInput {
    pub product_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
    pub size: Option<String>,
    pub color: Option<String>,
}

/// A cart line joined to its live catalog price
#[derive(Debug, Clone, Serialize)]
pub struct PricedCartItem {
    pub item: cart_item::Model,
    pub product_name: String,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

impl PricedCartItem {
    fn new(item: cart_item::Model, product: &product::Model) -> Self {
        let line_total = product.price * Decimal::from(item.quantity);
        Self {
            item,
            product_name: product.name.clone(),
            unit_price: product.price,
            line_total,
        }
    }
}

/// Cart with priced items and a computed total
#[derive(Debug, Serialize)]
pub struct CartWithItems {
    pub cart: cart::Model,
    pub items: Vec<PricedCartItem>,
    pub total: Decimal,
}

impl CartWithItems {
    fn new(cart: cart::Model, items: Vec<PricedCartItem>) -> Self {
        let total = items.iter().map(|i| i.line_total).sum();
        Self { cart, items, total }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(quantity: i32) -> cart_item::Model {
        cart_item::Model {
            id: Uuid::new_v4(),
            cart_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            quantity,
            size: Some("M".into()),
            color: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn product(price: Decimal) -> product::Model {
        product::Model {
            id: Uuid::new_v4(),
            name: "Linen Kurta".into(),
            slug: "linen-kurta".into(),
            description: None,
            price,
            currency: "INR".into(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn priced_item_line_total() {
        let priced = PricedCartItem::new(item(3), &product(dec!(499.50)));
        assert_eq!(priced.line_total, dec!(1498.50));
        assert_eq!(priced.unit_price, dec!(499.50));
    }

    #[test]
    fn cart_total_sums_line_totals() {
        let cart = cart::Model {
            id: Uuid::new_v4(),
            user_id: None,
            guest_id: Some("g-1".into()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let items = vec![
            PricedCartItem::new(item(2), &product(dec!(500.00))),
            PricedCartItem::new(item(1), &product(dec!(249.99))),
        ];

        let view = CartWithItems::new(cart, items);
        assert_eq!(view.total, dec!(1249.99));
    }

    #[test]
    fn add_item_input_rejects_zero_quantity() {
        let input = AddItemInput {
            product_id: Uuid::new_v4(),
            quantity: 0,
            size: None,
            color: None,
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn add_item_input_deserializes_without_variant() {
        let json = r#"{
            "product_id": "550e8400-e29b-41d4-a716-446655440000",
            "quantity": 2
        }"#;

        let input: AddItemInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.quantity, 2);
        assert!(input.size.is_none());
        assert!(input.color.is_none());
    }
}
