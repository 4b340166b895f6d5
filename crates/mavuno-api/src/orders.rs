use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use mavuno_types::api::{CheckoutRequest, Claims, ReleaseRequest};
use mavuno_types::models::{Order, UserRole};

use crate::auth::{AppState, AppStateInner};
use crate::error::ApiError;
use crate::escrow;

/// Orders relevant to a user: purchases for buyers, sales on their own
/// listings for farmers.
pub fn orders_for(state: &AppStateInner, user_id: Uuid, role: UserRole) -> Result<Vec<Order>, ApiError> {
    let id = user_id.to_string();
    let rows = match role {
        UserRole::Buyer => state.db.orders_for_buyer(&id)?,
        UserRole::Farmer => state.db.orders_for_farmer(&id)?,
    };
    let orders = rows
        .into_iter()
        .map(|row| row.into_order().map(|order| order.for_viewer(user_id)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(orders)
}

/// POST /listings/{id}/checkout: reserve stock and send the STK push.
pub async fn checkout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(listing_id): Path<Uuid>,
    Json(req): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = escrow::checkout(&state, &claims, listing_id, &req).await?;
    Ok((StatusCode::ACCEPTED, Json(order.for_viewer(claims.sub))))
}

pub async fn list_orders(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(orders_for(&state, claims.sub, claims.role)?))
}

pub async fn get_order(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .db
        .get_order(&order_id.to_string())?
        .ok_or(ApiError::NotFound("order"))?
        .into_order()?;
    if !order.is_participant(claims.sub) {
        return Err(ApiError::Forbidden("not a party to this order"));
    }
    Ok(Json(order.for_viewer(claims.sub)))
}

/// POST /orders/{id}/payment: poll the STK push outcome.
pub async fn check_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = escrow::refresh_payment(&state, claims.sub, order_id).await?;
    Ok(Json(order.for_viewer(claims.sub)))
}

/// POST /orders/{id}/release: handshake; pays the farmer.
pub async fn release(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(order_id): Path<Uuid>,
    Json(req): Json<ReleaseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = escrow::release(&state, claims.sub, order_id, &req.handshake_code).await?;
    Ok(Json(order.for_viewer(claims.sub)))
}

pub async fn cancel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = escrow::cancel(&state, claims.sub, order_id).await?;
    Ok(Json(order.for_viewer(claims.sub)))
}
