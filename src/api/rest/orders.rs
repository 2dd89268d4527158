use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::dispatch::CandidateOffer;
use crate::error::AppError;
use crate::models::order::Order;
use crate::store::AssignmentStore;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/dispatch", post(dispatch_order))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub pickup_address: String,
    pub dropoff_address: String,
}

#[derive(Deserialize)]
pub struct DispatchRequest {
    pub candidates: Vec<CandidateOffer>,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<Order>, AppError> {
    if payload.pickup_address.trim().is_empty() || payload.dropoff_address.trim().is_empty() {
        return Err(AppError::InvalidArgument(
            "pickup_address and dropoff_address are required".to_string(),
        ));
    }

    let order = Order::new(Uuid::new_v4(), payload.pickup_address, payload.dropoff_address);
    let order = state.store.insert_order(order).await?;

    Ok(Json(order))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.store.get_order(id).await?))
}

async fn dispatch_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DispatchRequest>,
) -> Result<Json<Order>, AppError> {
    let order = state.dispatcher.start_round(id, payload.candidates).await?;
    Ok(Json(order))
}
