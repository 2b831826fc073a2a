pub mod addresses;
pub mod carts;
pub mod checkout;
pub mod common;
pub mod orders;
pub mod payment_webhooks;
pub mod payments;

use crate::db::DbPool;
use crate::events::EventSender;
use crate::gateway::PaymentGateway;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub carts: Arc<crate::services::CartService>,
    pub checkout: Arc<crate::services::CheckoutService>,
    pub payments: Arc<crate::services::PaymentService>,
    pub webhooks: Arc<crate::services::WebhookService>,
    pub orders: Arc<crate::services::OrderService>,
    pub addresses: Arc<crate::services::AddressService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        gateway: Arc<PaymentGateway>,
        currency: String,
    ) -> Self {
        let carts = Arc::new(crate::services::CartService::new(
            db_pool.clone(),
            event_sender.clone(),
        ));
        let checkout = Arc::new(crate::services::CheckoutService::new(
            db_pool.clone(),
            event_sender.clone(),
            carts.clone(),
            gateway.clone(),
            currency,
        ));
        let payments = Arc::new(crate::services::PaymentService::new(
            db_pool.clone(),
            event_sender.clone(),
            gateway.clone(),
        ));
        let webhooks = Arc::new(crate::services::WebhookService::new(
            db_pool.clone(),
            event_sender.clone(),
            gateway,
            payments.clone(),
        ));
        let orders = Arc::new(crate::services::OrderService::new(
            db_pool.clone(),
            event_sender,
        ));
        let addresses = Arc::new(crate::services::AddressService::new(db_pool));

        Self {
            carts,
            checkout,
            payments,
            webhooks,
            orders,
            addresses,
        }
    }
}
