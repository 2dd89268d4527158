use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::OfferRef;
use crate::models::order::Order;

/// "You have an offer" signal sent to one candidate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfferNotification {
    pub driver_id: Uuid,
    pub offer: OfferRef,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DispatchEvent {
    Offer(OfferNotification),
    OrderUpdated(Order),
}
