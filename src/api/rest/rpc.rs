use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::Json;
use axum::Router;
use uuid::Uuid;

use crate::api::rest::identity::Caller;
use crate::error::AppError;
use crate::models::rpc::{ClaimOrderResponse, OrderRequest, RejectOrderResponse};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/claimOrder", post(claim_order))
        .route("/rejectOrder", post(reject_order))
}

fn parse_order_id(payload: &OrderRequest) -> Result<Uuid, AppError> {
    let raw = payload
        .order_id
        .as_deref()
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .ok_or_else(|| AppError::InvalidArgument("orderId is required".to_string()))?;

    Uuid::parse_str(raw)
        .map_err(|err| AppError::InvalidArgument(format!("invalid orderId {raw}: {err}")))
}

async fn claim_order(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(payload): Json<OrderRequest>,
) -> Result<Json<ClaimOrderResponse>, AppError> {
    let driver_id = caller.require()?;
    let order_id = parse_order_id(&payload)?;

    let outcome = state.coordinator.claim(Some(driver_id), order_id).await?;
    Ok(Json(outcome.into()))
}

async fn reject_order(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(payload): Json<OrderRequest>,
) -> Result<Json<RejectOrderResponse>, AppError> {
    let driver_id = caller.require()?;
    let order_id = parse_order_id(&payload)?;

    state.coordinator.reject(Some(driver_id), order_id).await?;
    Ok(Json(RejectOrderResponse::rejected()))
}
