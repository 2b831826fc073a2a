use crate::handlers::common::{success_response, PaginatedResponse, PaginationParams};
use crate::{
    auth::{AuthenticatedUser, ShopperIdentity},
    entities::order::OrderStatus,
    errors::ServiceError,
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, put},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

/// Creates the router for order endpoints
pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/status", put(update_order_status))
}

/// List the caller's orders, newest first
async fn list_orders(
    State(state): State<AppState>,
    identity: ShopperIdentity,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let (orders, total) = state
        .services
        .orders
        .list_orders(&identity.owner, params.page, params.per_page)
        .await?;

    Ok(success_response(PaginatedResponse::new(
        orders,
        params.page,
        params.per_page,
        total,
    )))
}

/// Fetch one of the caller's orders with its items
async fn get_order(
    State(state): State<AppState>,
    identity: ShopperIdentity,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.get_order(&identity.owner, id).await?;
    Ok(success_response(order))
}

/// Move an order along its lifecycle (operational tooling)
async fn update_order_status(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .update_status(id, payload.status)
        .await?;
    Ok(success_response(order))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}
