use crate::handlers::common::{created_response, success_response};
use crate::{
    auth::ShopperIdentity, errors::ServiceError, services::addresses::CreateAddressInput, AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, patch, post},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

/// Creates the router for address endpoints
pub fn addresses_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_address))
        .route("/", get(list_addresses))
        .route("/:id/default", patch(set_default_address))
}

/// Create an address for the caller (user or guest)
async fn create_address(
    State(state): State<AppState>,
    identity: ShopperIdentity,
    Json(payload): Json<CreateAddressRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let input = CreateAddressInput {
        name: payload.name,
        email: payload.email,
        phone: payload.phone,
        line1: payload.line1,
        line2: payload.line2,
        city: payload.city,
        state: payload.state,
        postal_code: payload.postal_code,
        country: payload.country,
        is_default: payload.is_default,
    };

    let address = state
        .services
        .addresses
        .create_address(&identity.owner, input)
        .await?;
    Ok(created_response(address))
}

/// List the caller's addresses, default first
async fn list_addresses(
    State(state): State<AppState>,
    identity: ShopperIdentity,
) -> Result<impl IntoResponse, ServiceError> {
    let addresses = state
        .services
        .addresses
        .list_addresses(&identity.owner)
        .await?;
    Ok(success_response(addresses))
}

/// Switch the caller's default address
async fn set_default_address(
    State(state): State<AppState>,
    identity: ShopperIdentity,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let address = state
        .services
        .addresses
        .set_default(&identity.owner, id)
        .await?;
    Ok(success_response(address))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAddressRequest {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: Option<String>,
    pub is_default: Option<bool>,
}
