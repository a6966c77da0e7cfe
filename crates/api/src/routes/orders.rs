//! Order placement and order history endpoints.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use common::{BuyerId, CorrelationId, OrderId};
use domain::{Order, PaymentMethod, PlaceOrder};
use read_cache::OrderList;
use serde::Deserialize;
use storage::{OrderStore, PlacementStore};

use crate::AppState;
use crate::auth::Principal;
use crate::error::ApiError;

/// Body of `POST /orders`.
///
/// `buyerRef` defaults to the authenticated user.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub buyer_ref: Option<String>,
    #[serde(default)]
    pub product_ref: String,
    pub quantity: i64,
    pub payment_method: String,
}

/// POST /orders — place a single-product order.
#[tracing::instrument(skip(state, principal, body), fields(user_id = %principal.user_id))]
pub async fn create<S: PlacementStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Extension(correlation_id): Extension<CorrelationId>,
    principal: Principal,
    body: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let payment_method = req
        .payment_method
        .parse::<PaymentMethod>()
        .map_err(|_| {
            ApiError::BadRequest(format!("Unknown payment method: {}", req.payment_method))
        })?;
    let buyer_ref = req.buyer_ref.unwrap_or_else(|| principal.user_id.clone());

    let cmd = PlaceOrder::new(buyer_ref, req.product_ref, req.quantity, payment_method)
        .with_correlation_id(correlation_id);
    let order = state.placement.place_order(cmd).await?;

    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders/{id} — a single order when `id` names one, otherwise the
/// order list of the buyer `id`.
#[tracing::instrument(skip(state, _principal))]
pub async fn get<S: PlacementStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _principal: Principal,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    if let Some(order_id) = OrderId::parse(&id) {
        if let Some(order) = state.placement.store().get_order(order_id).await? {
            return Ok(Json(order).into_response());
        }
    }

    let list = buyer_orders(&state, BuyerId::new(id)).await?;
    Ok(Json(list).into_response())
}

/// GET /buyers/{buyer_ref}/orders — the buyer's orders, newest first.
#[tracing::instrument(skip(state, _principal))]
pub async fn list_for_buyer<S: PlacementStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _principal: Principal,
    Path(buyer_ref): Path<String>,
) -> Result<Json<OrderList>, ApiError> {
    Ok(Json(buyer_orders(&state, BuyerId::new(buyer_ref)).await?))
}

async fn buyer_orders<S: PlacementStore + 'static>(
    state: &AppState<S>,
    buyer_id: BuyerId,
) -> Result<OrderList, ApiError> {
    if buyer_id.is_blank() {
        return Err(ApiError::BadRequest("Buyer reference is required".to_string()));
    }
    Ok(state.placement.cache().get_orders_for_buyer(&buyer_id).await?)
}
