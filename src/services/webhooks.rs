use crate::{
    entities::{webhook_event, WebhookEvent},
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::PaymentGateway,
    metrics,
    services::payments::PaymentService,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Gateway event names this processor reacts to.
const EVENT_PAYMENT_AUTHORIZED: &str = "payment.authorized";
const EVENT_PAYMENT_CAPTURED: &str = "payment.captured";
const EVENT_PAYMENT_FAILED: &str = "payment.failed";
const EVENT_ORDER_PAID: &str = "order.paid";

/// Asynchronous reconciliation of payment state against gateway-pushed
/// lifecycle events.
///
/// Every inbound event is appended to the audit log with its verification
/// outcome before any processing decision. Dispatch reuses the payment
/// service's guarded transitions and snapshot-guarded finalization, so this
/// path and the synchronous verifier converge on the same terminal state no
/// matter which lands first.
#[derive(Clone)]
pub struct WebhookService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<PaymentGateway>,
    payments: Arc<PaymentService>,
}

impl WebhookService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<PaymentGateway>,
        payments: Arc<PaymentService>,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            payments,
        }
    }

    #[instrument(skip_all)]
    pub async fn process(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, ServiceError> {
        let verified = match signature {
            Some(sig) => self.gateway.verify_webhook_signature(raw_body, sig)?,
            None => false,
        };

        let payload: Value = serde_json::from_slice(raw_body).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(raw_body).into_owned())
        });
        let event_type = payload
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        // The audit row is written no matter what; rejection happens after.
        let event_id = Uuid::new_v4();
        webhook_event::ActiveModel {
            id: Set(event_id),
            event_type: Set(event_type.clone()),
            payload: Set(payload.clone()),
            signature: Set(signature.map(str::to_string)),
            verified: Set(verified),
            processed: Set(false),
            created_at: Set(Utc::now()),
            processed_at: Set(None),
        }
        .insert(&*self.db)
        .await?;

        metrics::WEBHOOK_EVENTS_TOTAL
            .with_label_values(&[event_type.as_str(), if verified { "true" } else { "false" }])
            .inc();
        self.event_sender
            .send_or_log(Event::WebhookReceived {
                event_id,
                event_type: event_type.clone(),
                verified,
            })
            .await;

        if !verified {
            warn!(event_type = %event_type, "Rejecting webhook with bad or missing signature");
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ));
        }

        self.dispatch(&event_type, &payload).await?;
        self.mark_processed(event_id).await?;

        Ok(WebhookOutcome {
            event_id,
            event_type,
        })
    }

    async fn dispatch(&self, event_type: &str, payload: &Value) -> Result<(), ServiceError> {
        match event_type {
            EVENT_PAYMENT_AUTHORIZED => {
                let Some(entity) = payment_entity(payload) else {
                    warn!("payment.authorized event without payment entity");
                    return Ok(());
                };
                if let Some(record) = self.find_record(&entity).await? {
                    self.payments
                        .mark_authorized(&record, entity.payment_id.clone())
                        .await?;
                }
            }
            EVENT_PAYMENT_CAPTURED | EVENT_ORDER_PAID => {
                let Some(entity) = payment_entity(payload) else {
                    warn!(event_type, "capture event without payment entity");
                    return Ok(());
                };
                if let Some(record) = self.find_record(&entity).await? {
                    self.payments
                        .mark_captured(
                            &record,
                            entity.payment_id.clone(),
                            None,
                            entity.method.clone(),
                        )
                        .await?;
                    self.payments.finalize_order(record.order_id).await?;
                }
            }
            EVENT_PAYMENT_FAILED => {
                let Some(entity) = payment_entity(payload) else {
                    warn!("payment.failed event without payment entity");
                    return Ok(());
                };
                if let Some(record) = self.find_record(&entity).await? {
                    let reason = entity
                        .error_description
                        .clone()
                        .unwrap_or_else(|| "gateway reported failure".to_string());
                    self.payments.mark_payment_failed(&record, &reason).await?;
                    self.payments
                        .mark_order_payment_failed(record.order_id)
                        .await?;
                }
            }
            other => {
                // Unknown events are acknowledged so the gateway stops
                // retrying them.
                info!("Unhandled webhook event type: {}", other);
            }
        }
        Ok(())
    }

    async fn find_record(
        &self,
        entity: &PaymentEntity,
    ) -> Result<Option<crate::entities::payment::Model>, ServiceError> {
        let Some(gateway_order_id) = &entity.gateway_order_id else {
            warn!("webhook payment entity carries no order id");
            return Ok(None);
        };
        let record = self
            .payments
            .find_by_gateway_order(gateway_order_id)
            .await?;
        if record.is_none() {
            warn!(
                gateway_order_id = %gateway_order_id,
                "Webhook for unknown gateway order"
            );
        }
        Ok(record)
    }

    async fn mark_processed(&self, event_id: Uuid) -> Result<(), ServiceError> {
        let update = webhook_event::ActiveModel {
            id: Set(event_id),
            processed: Set(true),
            processed_at: Set(Some(Utc::now())),
            ..Default::default()
        };
        WebhookEvent::update(update).exec(&*self.db).await?;
        Ok(())
    }
}

/// The payment fields pulled out of a gateway event envelope.
#[derive(Debug, Default, PartialEq)]
struct PaymentEntity {
    payment_id: Option<String>,
    gateway_order_id: Option<String>,
    method: Option<String>,
    error_description: Option<String>,
}

/// The gateway wraps entities as
/// `{"event": ..., "payload": {"payment": {"entity": {...}}, "order": {"entity": {...}}}}`.
fn payment_entity(payload: &Value) -> Option<PaymentEntity> {
    let body = payload.get("payload")?;

    if let Some(entity) = body.pointer("/payment/entity") {
        return Some(PaymentEntity {
            payment_id: entity.get("id").and_then(Value::as_str).map(String::from),
            gateway_order_id: entity
                .get("order_id")
                .and_then(Value::as_str)
                .map(String::from),
            method: entity.get("method").and_then(Value::as_str).map(String::from),
            error_description: entity
                .get("error_description")
                .and_then(Value::as_str)
                .map(String::from),
        });
    }

    // order.paid events may only carry the order entity.
    body.pointer("/order/entity").map(|entity| PaymentEntity {
        payment_id: None,
        gateway_order_id: entity.get("id").and_then(Value::as_str).map(String::from),
        method: None,
        error_description: None,
    })
}

/// Acknowledgement returned to the gateway
#[derive(Debug, Serialize)]
pub struct WebhookOutcome {
    pub event_id: Uuid,
    pub event_type: String,
}
