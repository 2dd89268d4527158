use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pointer from a driver to the order it is currently being offered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfferRef {
    pub order_id: Uuid,
    pub assigned_at: DateTime<Utc>,
    pub estimated_distance: f64,
    pub estimated_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverRecord {
    pub id: Uuid,
    pub name: String,
    pub offer_ref: Option<OfferRef>,
    pub in_progress_order_id: Option<Uuid>,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl DriverRecord {
    pub fn new(id: Uuid, name: String) -> Self {
        Self {
            id,
            name,
            offer_ref: None,
            in_progress_order_id: None,
            is_active: true,
            updated_at: Utc::now(),
        }
    }

    pub fn offered_order(&self) -> Option<Uuid> {
        self.offer_ref.as_ref().map(|offer| offer.order_id)
    }

    /// Drops the offer only if it still points at `order_id`. Returns whether
    /// anything changed.
    pub fn clear_offer_for(&mut self, order_id: Uuid) -> bool {
        if self.offered_order() == Some(order_id) {
            self.offer_ref = None;
            true
        } else {
            false
        }
    }

    /// Drops the offer only if it is exactly `offer`, so a newer round for the
    /// same order survives.
    pub fn clear_offer_if(&mut self, offer: &OfferRef) -> bool {
        if self.offer_ref.as_ref() == Some(offer) {
            self.offer_ref = None;
            true
        } else {
            false
        }
    }
}
