//! Driver-side half of the protocol: surfacing offers and resolving each one
//! exactly once within its response window.

pub mod controller;
pub mod http;
pub mod local;
pub mod session;
pub mod watcher;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::rpc::{ClaimOrderResponse, RejectOrderResponse};

pub use controller::{ControllerHandle, ControllerSettings, ControllerState, ModalTimeoutController, Resolution};
pub use http::HttpClaimClient;
pub use local::LocalClaimClient;
pub use session::DriverSession;
pub use watcher::{DriverRequestWatcher, Offer};

/// The two callables a driver client may invoke. The identity is bound to the
/// client, the order id is the only input.
#[async_trait]
pub trait ClaimClient: Send + Sync {
    async fn claim_order(&self, order_id: Uuid) -> Result<ClaimOrderResponse, AppError>;

    async fn reject_order(&self, order_id: Uuid) -> Result<RejectOrderResponse, AppError>;
}
