use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::DriverRecord;
use crate::store::AssignmentStore;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(create_driver))
        .route("/drivers/:id", get(get_driver))
        .route("/drivers/:id/active", patch(update_driver_active))
}

#[derive(Deserialize)]
pub struct CreateDriverRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct UpdateActiveRequest {
    pub is_active: bool,
}

async fn create_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDriverRequest>,
) -> Result<Json<DriverRecord>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::InvalidArgument("name cannot be empty".to_string()));
    }

    let driver = DriverRecord::new(Uuid::new_v4(), payload.name);
    Ok(Json(state.store.insert_driver(driver).await?))
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DriverRecord>, AppError> {
    Ok(Json(state.store.get_driver(id).await?))
}

async fn update_driver_active(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateActiveRequest>,
) -> Result<Json<DriverRecord>, AppError> {
    let driver = state
        .store
        .transact_driver(id, &mut |current| {
            if current.is_active == payload.is_active {
                return Ok(None);
            }
            let mut next = current.clone();
            next.is_active = payload.is_active;
            next.updated_at = Utc::now();
            Ok(Some(next))
        })
        .await?;

    Ok(Json(driver))
}
