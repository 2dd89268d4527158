use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::client::ClaimClient;
use crate::client::controller::{ControllerHandle, ControllerSettings, ModalTimeoutController};
use crate::client::watcher::Offer;

/// Wires a driver's offer feed to controllers: one fresh controller per
/// offer, never reused.
pub struct DriverSession;

impl DriverSession {
    /// The returned receiver always holds the controller of the most recent
    /// offer, kept after it resolves so its outcome stays readable.
    pub fn spawn(
        offers: watch::Receiver<Option<Offer>>,
        client: Arc<dyn ClaimClient>,
        settings: ControllerSettings,
    ) -> watch::Receiver<Option<ControllerHandle>> {
        let (current_tx, current_rx) = watch::channel(None);
        tokio::spawn(run(offers, client, settings, current_tx));
        current_rx
    }
}

async fn run(
    mut offers: watch::Receiver<Option<Offer>>,
    client: Arc<dyn ClaimClient>,
    settings: ControllerSettings,
    current_tx: watch::Sender<Option<ControllerHandle>>,
) {
    let mut current: Option<ControllerHandle> = None;

    loop {
        let offer = offers.borrow_and_update().clone();
        let same_offer = match (&current, &offer) {
            (Some(handle), Some(offer)) => handle.offer().offer_ref == offer.offer_ref,
            _ => false,
        };

        if !same_offer {
            if let Some(previous) = current.take() {
                previous.withdraw();
            }
            if let Some(offer) = offer {
                debug!(order_id = %offer.order_id(), "starting offer controller");
                let handle = ModalTimeoutController::spawn(offer, client.clone(), settings);
                current = Some(handle.clone());
                current_tx.send_replace(Some(handle));
            }
        }

        tokio::select! {
            changed = offers.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = current_tx.closed() => break,
        }
    }

    if let Some(handle) = current {
        handle.withdraw();
    }
}
