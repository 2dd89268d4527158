use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::client::ClaimClient;
use crate::engine::claim::ClaimCoordinator;
use crate::error::AppError;
use crate::models::rpc::{ClaimOrderResponse, RejectOrderResponse};

/// Calls the coordinator in-process as a fixed driver.
pub struct LocalClaimClient {
    coordinator: Arc<ClaimCoordinator>,
    driver_id: Option<Uuid>,
}

impl LocalClaimClient {
    pub fn new(coordinator: Arc<ClaimCoordinator>, driver_id: Option<Uuid>) -> Self {
        Self {
            coordinator,
            driver_id,
        }
    }
}

#[async_trait]
impl ClaimClient for LocalClaimClient {
    async fn claim_order(&self, order_id: Uuid) -> Result<ClaimOrderResponse, AppError> {
        let outcome = self.coordinator.claim(self.driver_id, order_id).await?;
        Ok(outcome.into())
    }

    async fn reject_order(&self, order_id: Uuid) -> Result<RejectOrderResponse, AppError> {
        self.coordinator.reject(self.driver_id, order_id).await?;
        Ok(RejectOrderResponse::rejected())
    }
}
