use crate::{
    auth::{OwnerKey, ShopperIdentity},
    entities::{
        cart_item, order,
        order::{OrderPaymentStatus, OrderStatus, PaymentMethod, SnapshotLine},
        order_item, payment,
        payment::PaymentStatus,
        Address, Order, Payment,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::PaymentGateway,
    metrics,
    services::carts::{load_priced_items, PricedCartItem},
};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use super::carts::CartService;

/// Converts a cart into an order.
///
/// Cash-on-delivery finalizes immediately: order items are cut from the live
/// cart lines in one transaction. Online payments instead persist a frozen
/// snapshot on a pending order, create a gateway order for the total in minor
/// units, and leave the cart untouched until the payment verifier (or the
/// webhook processor) finalizes.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    carts: Arc<CartService>,
    gateway: Arc<PaymentGateway>,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        carts: Arc<CartService>,
        gateway: Arc<PaymentGateway>,
        currency: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            carts,
            gateway,
            currency,
        }
    }

    #[instrument(skip(self, identity))]
    pub async fn checkout(
        &self,
        identity: &ShopperIdentity,
        input: CheckoutInput,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let owner = &identity.owner;

        let cart = self
            .carts
            .find_cart(owner)
            .await?
            .ok_or_else(|| ServiceError::BadRequest("no active cart for this session".into()))?;

        let items =
            load_priced_items(&*self.db, cart.id, input.cart_item_ids.as_deref()).await?;
        if items.is_empty() {
            return Err(ServiceError::BadRequest(
                "no valid items found in cart to checkout".into(),
            ));
        }

        // The only authoritative total: live catalog prices at this instant.
        // Anything a client claims to have computed is ignored by contract.
        let total_amount: Decimal = items.iter().map(|i| i.line_total).sum();

        let shipping_address = Address::find_by_id(input.address_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::BadRequest("invalid address".into()))?;

        let contact_email = identity
            .email
            .clone()
            .or_else(|| shipping_address.email.clone());

        if input.payment_method.is_online() {
            self.checkout_online(owner, &input, &items, total_amount, contact_email)
                .await
        } else {
            self.checkout_cod(owner, &input, &items, total_amount, contact_email)
                .await
        }
    }

    /// Cash on delivery: the order confirms immediately and the consumed cart
    /// lines disappear, all in one transaction.
    async fn checkout_cod(
        &self,
        owner: &OwnerKey,
        input: &CheckoutInput,
        items: &[PricedCartItem],
        total_amount: Decimal,
        contact_email: Option<String>,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let txn = self.db.begin().await?;

        let order = insert_order(
            &txn,
            owner,
            input,
            total_amount,
            &self.currency,
            contact_email,
            OrderStatus::Confirmed,
            None,
            None,
        )
        .await?;

        for item in items {
            insert_order_item(&txn, order.id, &snapshot_line(item)).await?;
        }

        let consumed: Vec<Uuid> = items.iter().map(|i| i.item.id).collect();
        cart_item::Entity::delete_many()
            .filter(cart_item::Column::Id.is_in(consumed))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        metrics::CHECKOUTS_TOTAL.with_label_values(&["cod"]).inc();
        self.event_sender
            .send_or_log(Event::OrderCreated(order.id))
            .await;
        info!("COD order {} placed for {}", order.order_number, total_amount);

        Ok(CheckoutOutcome {
            order_id: order.id,
            order_number: order.order_number,
            total_amount,
            currency: self.currency.clone(),
            requires_payment: false,
            gateway_order_id: None,
            amount_minor: None,
            key_id: None,
        })
    }

    /// Online payment: pending order with a frozen snapshot, a gateway order
    /// in minor units, and a pending payment record. Cart lines stay put
    /// until the payment is verified.
    async fn checkout_online(
        &self,
        owner: &OwnerKey,
        input: &CheckoutInput,
        items: &[PricedCartItem],
        total_amount: Decimal,
        contact_email: Option<String>,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let lines: Vec<SnapshotLine> = items.iter().map(snapshot_line).collect();
        let hash = cart_hash(&lines);
        let amount_minor = to_minor_units(total_amount)?;

        // Duplicate-submission guard: an identical pending checkout already
        // holds a gateway order, so hand that one back instead of creating a
        // second charge for the same cart.
        if let Some(existing) = self.find_pending_duplicate(owner, &hash).await? {
            info!(
                "Duplicate checkout for order {}; returning existing gateway order",
                existing.order_number
            );
            return Ok(existing);
        }

        let snapshot_json = serde_json::to_value(&lines)
            .map_err(|e| ServiceError::SerializationError(e.to_string()))?;

        let txn = self.db.begin().await?;
        let order = insert_order(
            &txn,
            owner,
            input,
            total_amount,
            &self.currency,
            contact_email,
            OrderStatus::Pending,
            Some(snapshot_json),
            Some(hash),
        )
        .await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderCreated(order.id))
            .await;

        // A failure past this point leaves the pending order orphaned but
        // harmless: without a payment record it can never finalize.
        let gateway_order = self
            .gateway
            .create_order(amount_minor, &self.currency, &order.order_number)
            .await?;

        let now = Utc::now();
        let payment = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            gateway_order_id: Set(gateway_order.id.clone()),
            gateway_payment_id: Set(None),
            gateway_signature: Set(None),
            amount: Set(total_amount),
            currency: Set(self.currency.clone()),
            status: Set(PaymentStatus::Pending),
            payment_method: Set(None),
            failure_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        if let Err(e) = payment.insert(&*self.db).await {
            // Gateway order exists but we lost its local record: manual
            // reconciliation territory.
            error!(
                order_id = %order.id,
                gateway_order_id = %gateway_order.id,
                "CRITICAL: payment record insert failed after gateway order creation: {}",
                e
            );
            return Err(e.into());
        }

        let method_label = input.payment_method.to_string();
        metrics::CHECKOUTS_TOTAL
            .with_label_values(&[method_label.as_str()])
            .inc();
        self.event_sender
            .send_or_log(Event::PaymentInitiated {
                order_id: order.id,
                gateway_order_id: gateway_order.id.clone(),
            })
            .await;
        info!(
            "Online order {} awaiting payment via gateway order {}",
            order.order_number, gateway_order.id
        );

        Ok(CheckoutOutcome {
            order_id: order.id,
            order_number: order.order_number,
            total_amount,
            currency: self.currency.clone(),
            requires_payment: true,
            gateway_order_id: Some(gateway_order.id),
            amount_minor: Some(amount_minor),
            key_id: Some(self.gateway.key_id().to_string()),
        })
    }

    /// Look for an identical, still-pending online checkout by the same owner
    /// and return its outcome when its gateway order already exists.
    async fn find_pending_duplicate(
        &self,
        owner: &OwnerKey,
        hash: &str,
    ) -> Result<Option<CheckoutOutcome>, ServiceError> {
        let existing = Order::find()
            .filter(order_owner_condition(owner))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .filter(order::Column::PaymentStatus.eq(OrderPaymentStatus::Pending))
            .filter(order::Column::CartHash.eq(hash))
            .filter(order::Column::CartSnapshot.is_not_null())
            .one(&*self.db)
            .await?;

        let Some(existing) = existing else {
            return Ok(None);
        };

        let Some(record) = Payment::find()
            .filter(payment::Column::OrderId.eq(existing.id))
            .filter(payment::Column::Status.eq(PaymentStatus::Pending))
            .one(&*self.db)
            .await?
        else {
            // Orphaned order without a payment record (earlier gateway
            // failure); a fresh checkout supersedes it.
            return Ok(None);
        };

        let amount_minor = to_minor_units(existing.total_amount)?;
        Ok(Some(CheckoutOutcome {
            order_id: existing.id,
            order_number: existing.order_number,
            total_amount: existing.total_amount,
            currency: existing.currency,
            requires_payment: true,
            gateway_order_id: Some(record.gateway_order_id),
            amount_minor: Some(amount_minor),
            key_id: Some(self.gateway.key_id().to_string()),
        }))
    }
}

#[allow(clippy::too_many_arguments)]
async fn insert_order(
    txn: &DatabaseTransaction,
    owner: &OwnerKey,
    input: &CheckoutInput,
    total_amount: Decimal,
    currency: &str,
    contact_email: Option<String>,
    status: OrderStatus,
    cart_snapshot: Option<serde_json::Value>,
    cart_hash: Option<String>,
) -> Result<order::Model, ServiceError> {
    let now = Utc::now();
    let order = order::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_number: Set(generate_order_number()),
        user_id: Set(owner.user_id()),
        guest_id: Set(owner.guest_id().map(str::to_string)),
        contact_email: Set(contact_email),
        address_id: Set(input.address_id),
        status: Set(status),
        payment_status: Set(OrderPaymentStatus::Pending),
        payment_method: Set(input.payment_method),
        total_amount: Set(total_amount),
        currency: Set(currency.to_string()),
        cart_snapshot: Set(cart_snapshot),
        cart_hash: Set(cart_hash),
        created_at: Set(now),
        updated_at: Set(now),
    };

    Ok(order.insert(txn).await?)
}

pub(crate) async fn insert_order_item(
    txn: &DatabaseTransaction,
    order_id: Uuid,
    line: &SnapshotLine,
) -> Result<(), ServiceError> {
    order_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        product_id: Set(line.product_id),
        quantity: Set(line.quantity),
        price_at_purchase: Set(line.unit_price),
        size: Set(line.size.clone()),
        color: Set(line.color.clone()),
        created_at: Set(Utc::now()),
    }
    .insert(txn)
    .await?;
    Ok(())
}

pub(crate) fn order_owner_condition(owner: &OwnerKey) -> Condition {
    match owner {
        OwnerKey::User(id) => Condition::all().add(order::Column::UserId.eq(*id)),
        OwnerKey::Guest(id) => Condition::all().add(order::Column::GuestId.eq(id.clone())),
    }
}

fn snapshot_line(item: &PricedCartItem) -> SnapshotLine {
    SnapshotLine {
        cart_item_id: item.item.id,
        product_id: item.item.product_id,
        quantity: item.item.quantity,
        unit_price: item.unit_price,
        size: item.item.size.clone(),
        color: item.item.color.clone(),
    }
}

/// Stable digest of a line set, used to recognize a duplicate checkout
/// submission for the same cart content.
fn cart_hash(lines: &[SnapshotLine]) -> String {
    let mut sorted: Vec<&SnapshotLine> = lines.iter().collect();
    sorted.sort_by_key(|l| l.cart_item_id);

    let mut hasher = Sha256::new();
    for line in sorted {
        hasher.update(line.cart_item_id.as_bytes());
        hasher.update(line.product_id.as_bytes());
        hasher.update(line.quantity.to_be_bytes());
        hasher.update(line.unit_price.to_string().as_bytes());
        hasher.update(line.size.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"\x1f");
        hasher.update(line.color.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"\x1e");
    }
    hex::encode(hasher.finalize())
}

/// Gateway amounts are integral minor units (paise), so scale by 100.
fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| {
            ServiceError::InternalError(format!("order total {} out of gateway range", amount))
        })
}

fn generate_order_number() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| {
            const CHARSET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
            CHARSET[rng.gen_range(0..CHARSET.len())] as char
        })
        .collect();
    format!("ORD-{:X}-{}", Utc::now().timestamp(), suffix)
}

/// Checkout request, as validated by the handler
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutInput {
    pub address_id: Uuid,
    pub payment_method: PaymentMethod,
    pub cart_item_ids: Option<Vec<Uuid>>,
}

/// Checkout result returned to the client
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutOutcome {
    pub order_id: Uuid,
    pub order_number: String,
    pub total_amount: Decimal,
    pub currency: String,
    pub requires_payment: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_order_id: Option<String>,
    /// Amount in minor units (paise), as the payment widget expects
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_minor: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}
