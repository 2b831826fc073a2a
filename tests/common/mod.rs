use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use storefront_api::{
    auth::{AuthConfig, AuthService, OwnerKey, ShopperIdentity},
    config::AppConfig,
    db,
    entities::{address, product},
    events::{self, EventSender},
    gateway::PaymentGateway,
    handlers::AppServices,
    AppState,
};
use tokio::sync::mpsc;
use uuid::Uuid;
use wiremock::MockServer;

pub const TEST_JWT_SECRET: &str = "integration_test_jwt_secret_0123456789abcdef";
pub const TEST_GATEWAY_SECRET: &str = "integration_gateway_secret";
pub const TEST_WEBHOOK_SECRET: &str = "integration_webhook_secret";

/// Test harness: in-memory SQLite, migrated schema, services wired against a
/// wiremock gateway.
pub struct TestApp {
    pub state: AppState,
    pub services: AppServices,
    pub gateway_server: MockServer,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let gateway_server = MockServer::start().await;

        let mut cfg = AppConfig::new(
            "sqlite::memory:",
            TEST_JWT_SECRET,
            "127.0.0.1",
            18_080,
            "test",
        );
        // A single connection keeps the in-memory database alive and shared.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.gateway_base_url = gateway_server.uri();
        cfg.gateway_key_secret = TEST_GATEWAY_SECRET.to_string();
        cfg.gateway_webhook_secret = TEST_WEBHOOK_SECRET.to_string();

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway =
            Arc::new(PaymentGateway::from_config(&cfg).expect("gateway client should build"));
        let services = AppServices::new(
            db_arc.clone(),
            Arc::new(event_sender.clone()),
            gateway,
            cfg.currency.clone(),
        );

        let auth = Arc::new(AuthService::new(AuthConfig::new(
            cfg.jwt_secret.clone(),
            None,
            None,
            3600,
        )));

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            auth,
            services: services.clone(),
        };

        Self {
            state,
            services,
            gateway_server,
            _event_task: event_task,
        }
    }

    /// Seed an active catalog product at the given price. Slugs get a random
    /// suffix so repeated seeds of the same name never collide.
    pub async fn seed_product(&self, name: &str, price: Decimal) -> product::Model {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let slug = format!("{}-{}", product::slugify(name), &id.simple().to_string()[..8]);
        product::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            slug: Set(slug),
            description: Set(None),
            price: Set(price),
            currency: Set("INR".to_string()),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("product seed should insert")
    }

    /// Seed an address owned by `owner`, optionally carrying a contact email.
    pub async fn seed_address(&self, owner: &OwnerKey, email: Option<&str>) -> address::Model {
        let now = Utc::now();
        address::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(owner.user_id()),
            guest_id: Set(owner.guest_id().map(str::to_string)),
            name: Set("Asha Rao".to_string()),
            email: Set(email.map(str::to_string)),
            phone: Set(Some("+919800000000".to_string())),
            line1: Set("12 MG Road".to_string()),
            line2: Set(None),
            city: Set("Bengaluru".to_string()),
            state: Set("KA".to_string()),
            postal_code: Set("560001".to_string()),
            country: Set("IN".to_string()),
            is_default: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("address seed should insert")
    }
}

/// A guest identity with a fresh opaque id.
pub fn guest_identity() -> ShopperIdentity {
    ShopperIdentity {
        owner: OwnerKey::Guest(format!("guest-{}", Uuid::new_v4())),
        email: None,
        dormant_guest_id: None,
    }
}

/// An authenticated identity for a fresh user.
pub fn user_identity(email: Option<&str>) -> ShopperIdentity {
    ShopperIdentity {
        owner: OwnerKey::User(Uuid::new_v4()),
        email: email.map(str::to_string),
        dormant_guest_id: None,
    }
}

/// HMAC-SHA256 hex digest, as the gateway would compute it.
pub fn hmac_hex(secret: &str, message: &[u8]) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// The browser-callback signature for a captured payment.
pub fn payment_signature(gateway_order_id: &str, gateway_payment_id: &str) -> String {
    hmac_hex(
        TEST_GATEWAY_SECRET,
        format!("{}|{}", gateway_order_id, gateway_payment_id).as_bytes(),
    )
}
