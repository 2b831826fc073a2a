use crate::handlers::common::{no_content_response, success_response, validate_input};
use crate::{
    auth::{AuthenticatedUser, ShopperIdentity},
    errors::ServiceError,
    services::carts::AddItemInput,
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for cart endpoints
pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart))
        .route("/items", post(add_to_cart))
        .route(
            "/items/:item_id",
            put(update_cart_item).delete(remove_cart_item),
        )
        .route("/merge", post(merge_guest_cart))
}

/// Get the caller's cart with priced items
async fn get_cart(
    State(state): State<AppState>,
    identity: ShopperIdentity,
) -> Result<impl IntoResponse, ServiceError> {
    match state
        .services
        .carts
        .load_cart_with_prices(&identity.owner, None)
        .await
    {
        Ok(view) => Ok(success_response(view)),
        // No cart yet is an empty cart, not an error.
        Err(ServiceError::NotFound(_)) => Ok(success_response(json!({
            "cart": null,
            "items": [],
            "total": "0"
        }))),
        Err(e) => Err(e),
    }
}

/// Add an item to the caller's cart (creating the cart on first use)
async fn add_to_cart(
    State(state): State<AppState>,
    identity: ShopperIdentity,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let input = AddItemInput {
        product_id: payload.product_id,
        quantity: payload.quantity,
        size: payload.size,
        color: payload.color,
    };

    let view = state.services.carts.add_item(&identity.owner, input).await?;
    Ok(success_response(view))
}

/// Update a cart line's quantity; zero removes it
async fn update_cart_item(
    State(state): State<AppState>,
    identity: ShopperIdentity,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let view = state
        .services
        .carts
        .update_item_quantity(&identity.owner, item_id, payload.quantity)
        .await?;
    Ok(success_response(view))
}

/// Remove a cart line
async fn remove_cart_item(
    State(state): State<AppState>,
    identity: ShopperIdentity,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .services
        .carts
        .remove_item(&identity.owner, item_id)
        .await?;
    Ok(no_content_response())
}

/// Fold the caller's guest cart into their user cart after login
async fn merge_guest_cart(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    payload: Option<Json<MergeCartRequest>>,
) -> Result<impl IntoResponse, ServiceError> {
    let guest_id = payload
        .and_then(|Json(p)| p.guest_id)
        .or(user.guest_id)
        .ok_or_else(|| ServiceError::BadRequest("no guest cart to merge".into()))?;

    let merged = state
        .services
        .carts
        .merge_guest_cart(user.user_id, &guest_id)
        .await?;

    Ok(success_response(json!({
        "merged": merged.is_some()
    })))
}

// Request DTOs

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 100))]
    pub quantity: i32,
    pub size: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateQuantityRequest {
    #[validate(range(min = 0, max = 100))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeCartRequest {
    pub guest_id: Option<String>,
}
