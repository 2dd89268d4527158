use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::models::driver::OfferRef;
use crate::models::event::{DispatchEvent, OfferNotification};

/// Delivers "you have an offer" signals. Fire-and-forget: the protocol never
/// waits on, or relies on, delivery.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn offer(&self, driver_id: Uuid, offer: &OfferRef);
}

/// Publishes offers on the service event bus, where websocket clients pick
/// them up.
pub struct BroadcastNotifier {
    events_tx: broadcast::Sender<DispatchEvent>,
}

impl BroadcastNotifier {
    pub fn new(events_tx: broadcast::Sender<DispatchEvent>) -> Self {
        Self { events_tx }
    }
}

#[async_trait]
impl NotificationDispatcher for BroadcastNotifier {
    async fn offer(&self, driver_id: Uuid, offer: &OfferRef) {
        let event = DispatchEvent::Offer(OfferNotification {
            driver_id,
            offer: offer.clone(),
        });

        if self.events_tx.send(event).is_err() {
            debug!(driver_id = %driver_id, order_id = %offer.order_id, "no listeners for offer");
        }
    }
}
