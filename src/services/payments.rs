use crate::{
    entities::{
        cart_item, order,
        order::{OrderPaymentStatus, OrderStatus},
        payment,
        payment::PaymentStatus,
        Order, Payment,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::PaymentGateway,
    metrics,
    services::checkout::insert_order_item,
};
use chrono::Utc;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

pub const SIGNATURE_MISMATCH: &str = "SIGNATURE_MISMATCH";

/// Verifies signed payment callbacks and finalizes the paid order.
///
/// Every status write is guarded by the payment lattice
/// (`pending -> authorized -> captured`, failures from non-terminal states),
/// so this path and the webhook processor can race on the same record and
/// still converge: whoever advances first wins, the other becomes a no-op.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<PaymentGateway>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<PaymentGateway>,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
        }
    }

    /// Verify a browser-completed payment against its stored record.
    ///
    /// Idempotent: a record that is already captured short-circuits to
    /// success, so clients may retry or double-submit freely.
    #[instrument(skip(self, input), fields(gateway_order_id = %input.gateway_order_id))]
    pub async fn verify_payment(
        &self,
        input: VerifyPaymentInput,
    ) -> Result<VerifyOutcome, ServiceError> {
        input.validate()?;

        let record = Payment::find()
            .filter(payment::Column::GatewayOrderId.eq(input.gateway_order_id.clone()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "no payment for gateway order {}",
                    input.gateway_order_id
                ))
            })?;

        if record.status == PaymentStatus::Captured {
            // No-op success for retries; re-running finalization heals an
            // earlier crash between capture and finalization.
            self.finalize_order(record.order_id).await?;
            return Ok(VerifyOutcome {
                order_id: record.order_id,
                already_verified: true,
            });
        }

        let valid = self.gateway.verify_payment_signature(
            &input.gateway_order_id,
            &input.gateway_payment_id,
            &input.signature,
        )?;
        if !valid {
            self.mark_payment_failed(&record, SIGNATURE_MISMATCH).await?;
            return Err(ServiceError::InvalidSignature(
                "payment verification failed".to_string(),
            ));
        }

        // Best effort: the method reported by the gateway is informational
        // and must not block capture.
        let method = match self.gateway.fetch_payment(&input.gateway_payment_id).await {
            Ok(details) => details.method,
            Err(e) => {
                warn!("Could not fetch payment details from gateway: {}", e);
                None
            }
        };

        let advanced = self
            .mark_captured(
                &record,
                Some(input.gateway_payment_id.clone()),
                Some(input.signature.clone()),
                method,
            )
            .await?;

        if !advanced {
            // A concurrent verifier or webhook got there first; adopt its
            // outcome instead of fighting it.
            let current = Payment::find_by_id(record.id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| {
                    ServiceError::InternalError("payment record vanished mid-verify".to_string())
                })?;
            if current.status != PaymentStatus::Captured {
                return Err(ServiceError::PaymentFailed(format!(
                    "payment is {} and cannot be captured",
                    current.status
                )));
            }
        }

        self.finalize_order(record.order_id).await?;

        Ok(VerifyOutcome {
            order_id: record.order_id,
            already_verified: !advanced,
        })
    }

    /// Advance a record to captured through the lattice guard. Returns false
    /// when another writer advanced it first.
    pub(crate) async fn mark_captured(
        &self,
        record: &payment::Model,
        gateway_payment_id: Option<String>,
        signature: Option<String>,
        method: Option<String>,
    ) -> Result<bool, ServiceError> {
        let mut update = payment::ActiveModel {
            status: Set(PaymentStatus::Captured),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        // Keep whatever ids an earlier authorization already recorded.
        if gateway_payment_id.is_some() {
            update.gateway_payment_id = Set(gateway_payment_id);
        }
        if signature.is_some() {
            update.gateway_signature = Set(signature);
        }
        if method.is_some() {
            update.payment_method = Set(method);
        }

        let result = Payment::update_many()
            .set(update)
            .filter(payment::Column::Id.eq(record.id))
            .filter(
                payment::Column::Status.is_in(PaymentStatus::sources_of(PaymentStatus::Captured)),
            )
            .exec(&*self.db)
            .await?;

        if result.rows_affected > 0 {
            metrics::PAYMENTS_CAPTURED_TOTAL.inc();
            self.event_sender
                .send_or_log(Event::PaymentCaptured(record.id))
                .await;
        }
        Ok(result.rows_affected > 0)
    }

    /// Advance a record to authorized. A no-op if the record moved past
    /// authorization already.
    pub(crate) async fn mark_authorized(
        &self,
        record: &payment::Model,
        gateway_payment_id: Option<String>,
    ) -> Result<bool, ServiceError> {
        let mut update = payment::ActiveModel {
            status: Set(PaymentStatus::Authorized),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        if gateway_payment_id.is_some() {
            update.gateway_payment_id = Set(gateway_payment_id);
        }

        let result = Payment::update_many()
            .set(update)
            .filter(payment::Column::Id.eq(record.id))
            .filter(
                payment::Column::Status
                    .is_in(PaymentStatus::sources_of(PaymentStatus::Authorized)),
            )
            .exec(&*self.db)
            .await?;

        if result.rows_affected > 0 {
            self.event_sender
                .send_or_log(Event::PaymentAuthorized(record.id))
                .await;
        }
        Ok(result.rows_affected > 0)
    }

    /// Move a record to failed with a reason. Terminal records are left
    /// untouched: a failure report can never undo a capture.
    pub(crate) async fn mark_payment_failed(
        &self,
        record: &payment::Model,
        reason: &str,
    ) -> Result<bool, ServiceError> {
        let update = payment::ActiveModel {
            status: Set(PaymentStatus::Failed),
            failure_reason: Set(Some(reason.to_string())),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };

        let result = Payment::update_many()
            .set(update)
            .filter(payment::Column::Id.eq(record.id))
            .filter(payment::Column::Status.is_in(PaymentStatus::sources_of(PaymentStatus::Failed)))
            .exec(&*self.db)
            .await?;

        if result.rows_affected > 0 {
            metrics::PAYMENTS_FAILED_TOTAL.inc();
            self.event_sender
                .send_or_log(Event::PaymentFailed {
                    payment_id: record.id,
                    reason: reason.to_string(),
                })
                .await;
        }
        Ok(result.rows_affected > 0)
    }

    /// Materialize a paid order from its snapshot, in one transaction:
    /// order items appear, the snapshotted cart lines disappear, the order
    /// flips to confirmed/paid and the snapshot is cleared.
    ///
    /// Idempotent and race-safe: the snapshot column doubles as the guard.
    /// Whichever caller nulls it first does the work; everyone else sees an
    /// already-finalized order and returns successfully.
    #[instrument(skip(self))]
    pub(crate) async fn finalize_order(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        let order = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let Some(lines) = order
            .snapshot_lines()
            .map_err(|e| ServiceError::SerializationError(e.to_string()))?
        else {
            // Already finalized (or COD): nothing to do.
            return Ok(());
        };

        let claimed = claim_snapshot(&txn, order_id).await?;
        if !claimed {
            // Another path finalized between our read and the guard.
            return Ok(());
        }

        for line in &lines {
            insert_order_item(&txn, order_id, line).await?;
        }

        // Delete exactly the snapshotted lines; the live cart may have
        // gained items since checkout and those must survive.
        let snapshot_ids: Vec<Uuid> = lines.iter().map(|l| l.cart_item_id).collect();
        cart_item::Entity::delete_many()
            .filter(cart_item::Column::Id.is_in(snapshot_ids))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: order.status.to_string(),
                new_status: OrderStatus::Confirmed.to_string(),
            })
            .await;
        self.event_sender
            .send_or_log(Event::OrderFinalized(order_id))
            .await;
        info!("Order {} finalized after payment capture", order.order_number);

        Ok(())
    }

    /// Fail the order attached to a payment while it is still pending.
    /// Finalized orders are deliberately left alone.
    pub(crate) async fn mark_order_payment_failed(
        &self,
        order_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let update = order::ActiveModel {
            payment_status: Set(OrderPaymentStatus::Failed),
            status: Set(OrderStatus::Cancelled),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };

        let result = Order::update_many()
            .set(update)
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// Look up a payment record by its gateway order id.
    pub(crate) async fn find_by_gateway_order(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<payment::Model>, ServiceError> {
        Ok(Payment::find()
            .filter(payment::Column::GatewayOrderId.eq(gateway_order_id))
            .one(&*self.db)
            .await?)
    }
}

/// Atomically claim the snapshot: flip the order to confirmed/paid and null
/// the snapshot, guarded on the snapshot still being present.
async fn claim_snapshot(txn: &DatabaseTransaction, order_id: Uuid) -> Result<bool, ServiceError> {
    let update = order::ActiveModel {
        status: Set(OrderStatus::Confirmed),
        payment_status: Set(OrderPaymentStatus::Paid),
        cart_snapshot: Set(None),
        updated_at: Set(Utc::now()),
        ..Default::default()
    };

    let result = Order::update_many()
        .set(update)
        .filter(order::Column::Id.eq(order_id))
        .filter(order::Column::CartSnapshot.is_not_null())
        .exec(txn)
        .await?;

    Ok(result.rows_affected > 0)
}

/// Payment verification request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct VerifyPaymentInput {
    #[validate(length(min = 1))]
    pub gateway_order_id: String,
    #[validate(length(min = 1))]
    pub gateway_payment_id: String,
    #[validate(length(min = 1))]
    pub signature: String,
}

/// Successful verification result
#[derive(Debug, Clone, Serialize)]
pub struct VerifyOutcome {
    pub order_id: Uuid,
    /// True when this call was a retry of an already-captured payment
    pub already_verified: bool,
}
