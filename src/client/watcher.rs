use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::{DriverRecord, OfferRef};
use crate::models::order::Order;
use crate::store::AssignmentStore;

/// An offer as the driver sees it: the reference and the order it points at,
/// always published together.
#[derive(Debug, Clone, PartialEq)]
pub struct Offer {
    pub offer_ref: OfferRef,
    pub order: Order,
}

impl Offer {
    pub fn order_id(&self) -> Uuid {
        self.offer_ref.order_id
    }
}

type FetchDone = (u64, OfferRef, Result<Order, AppError>);

/// Follows one driver record and turns offer references into full offers.
pub struct DriverRequestWatcher {
    store: Arc<dyn AssignmentStore>,
    driver_id: Uuid,
    /// Bumped on every reference change; a fetch only publishes if its token
    /// is still current when it completes.
    token: u64,
    tracked: Option<OfferRef>,
    done_tx: mpsc::UnboundedSender<FetchDone>,
}

impl DriverRequestWatcher {
    /// Starts watching `driver_id`. The receiver holds `None` until an offer
    /// has been fetched, and again whenever the offer goes away.
    pub fn spawn(
        store: Arc<dyn AssignmentStore>,
        driver_id: Uuid,
    ) -> Result<watch::Receiver<Option<Offer>>, AppError> {
        let driver_rx = store.subscribe_driver(driver_id)?;
        let (offer_tx, offer_rx) = watch::channel(None);
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        let watcher = Self {
            store,
            driver_id,
            token: 0,
            tracked: None,
            done_tx,
        };
        tokio::spawn(watcher.run(driver_rx, done_rx, offer_tx));

        Ok(offer_rx)
    }

    async fn run(
        mut self,
        mut driver_rx: watch::Receiver<DriverRecord>,
        mut done_rx: mpsc::UnboundedReceiver<FetchDone>,
        offer_tx: watch::Sender<Option<Offer>>,
    ) {
        let initial = driver_rx.borrow_and_update().clone();
        self.observe(&initial, &offer_tx);

        loop {
            tokio::select! {
                changed = driver_rx.changed() => {
                    if changed.is_err() {
                        debug!(driver_id = %self.driver_id, "driver record closed; watcher stopping");
                        break;
                    }
                    let record = driver_rx.borrow_and_update().clone();
                    self.observe(&record, &offer_tx);
                }
                Some((token, offer_ref, result)) = done_rx.recv() => {
                    self.complete(token, offer_ref, result, &offer_tx);
                }
                _ = offer_tx.closed() => break,
            }
        }
    }

    fn observe(&mut self, record: &DriverRecord, offer_tx: &watch::Sender<Option<Offer>>) {
        match &record.offer_ref {
            Some(offer_ref) if self.tracked.as_ref() != Some(offer_ref) => {
                self.token += 1;
                self.tracked = Some(offer_ref.clone());
                // The previous offer is superseded now, not when the fetch lands.
                publish(offer_tx, None);

                let store = self.store.clone();
                let done_tx = self.done_tx.clone();
                let token = self.token;
                let offer_ref = offer_ref.clone();
                tokio::spawn(async move {
                    let result = store.get_order(offer_ref.order_id).await;
                    let _ = done_tx.send((token, offer_ref, result));
                });
            }
            Some(_) => {}
            None => {
                if self.tracked.take().is_some() {
                    self.token += 1;
                    publish(offer_tx, None);
                }
            }
        }
    }

    fn complete(
        &self,
        token: u64,
        offer_ref: OfferRef,
        result: Result<Order, AppError>,
        offer_tx: &watch::Sender<Option<Offer>>,
    ) {
        if token != self.token {
            debug!(
                driver_id = %self.driver_id,
                order_id = %offer_ref.order_id,
                "discarding superseded order fetch"
            );
            return;
        }

        match result {
            Ok(order) => publish(offer_tx, Some(Offer { offer_ref, order })),
            Err(err) => {
                warn!(
                    driver_id = %self.driver_id,
                    order_id = %offer_ref.order_id,
                    error = %err,
                    "offered order could not be fetched"
                );
                publish(offer_tx, None);
            }
        }
    }
}

/// Only wakes receivers when the visible offer actually changes.
fn publish(offer_tx: &watch::Sender<Option<Offer>>, offer: Option<Offer>) {
    offer_tx.send_if_modified(|current| {
        if *current == offer {
            false
        } else {
            *current = offer;
            true
        }
    });
}
