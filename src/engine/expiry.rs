use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::engine::claim::ClaimCoordinator;
use crate::engine::dispatch::retract_offer;
use crate::error::AppError;
use crate::models::order::{Order, OrderStatus};
use crate::state::AppState;
use crate::store::AssignmentStore;

/// Periodically rejects offers nobody answered, so a driver who drops off
/// mid-offer cannot hold an order forever, and drops offer references that
/// outlived their assignment.
pub async fn run_expiry_sweeper(state: Arc<AppState>, expiry: Duration, interval: Duration) {
    info!(expiry_secs = expiry.as_secs(), "offer expiry sweeper started");

    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;

        match sweep_expired_offers(state.store.as_ref(), &state.coordinator, expiry, Utc::now())
            .await
        {
            Ok(0) => {}
            Ok(expired) => {
                state.metrics.offers_expired_total.inc_by(expired as u64);
                info!(expired, "expired unanswered offers");
            }
            Err(err) => error!(error = %err, "offer expiry sweep failed"),
        }

        match sweep_orphaned_offers(state.store.as_ref()).await {
            Ok(0) => {}
            Ok(cleared) => info!(cleared, "cleared orphaned offer references"),
            Err(err) => error!(error = %err, "orphaned offer sweep failed"),
        }
    }
}

/// Rejects every pending assignment older than `expiry`, on behalf of its
/// driver. Returns how many were rejected.
pub async fn sweep_expired_offers(
    store: &dyn AssignmentStore,
    coordinator: &ClaimCoordinator,
    expiry: Duration,
    now: DateTime<Utc>,
) -> Result<usize, AppError> {
    let expiry = chrono::Duration::from_std(expiry)
        .map_err(|err| AppError::Internal(format!("invalid offer expiry: {err}")))?;

    let mut expired = 0;
    for order in store.orders_with_status(OrderStatus::AssignmentPending).await? {
        expired += expire_stale_assignments(coordinator, &order, expiry, now).await;
    }

    Ok(expired)
}

/// `order` is a snapshot; drivers may have answered since. Only rejections
/// this sweep actually recorded are counted.
async fn expire_stale_assignments(
    coordinator: &ClaimCoordinator,
    order: &Order,
    expiry: chrono::Duration,
    now: DateTime<Utc>,
) -> usize {
    let stale = order
        .assignments
        .iter()
        .filter(|a| a.is_pending() && a.assigned_at + expiry <= now)
        .map(|a| a.driver_id);

    let mut expired = 0;
    for driver_id in stale {
        match coordinator.record_reject(Some(driver_id), order.id).await {
            Ok(true) => expired += 1,
            Ok(false) => {
                debug!(order_id = %order.id, driver_id = %driver_id, "offer answered before expiry")
            }
            Err(err) => warn!(
                order_id = %order.id,
                driver_id = %driver_id,
                error = %err,
                "failed to expire offer"
            ),
        }
    }
    expired
}

/// Clears offer references whose assignment is no longer pending, or whose
/// order is gone. Returns how many were cleared.
pub async fn sweep_orphaned_offers(store: &dyn AssignmentStore) -> Result<usize, AppError> {
    let mut cleared = 0;
    for driver in store.drivers_with_offer().await? {
        let Some(offer) = driver.offer_ref else {
            continue;
        };

        let live = match store.get_order(offer.order_id).await {
            Ok(order) => order.offer_is_live(driver.id, &offer),
            Err(AppError::NotFound(_)) => false,
            Err(err) => return Err(err),
        };
        if live {
            continue;
        }

        if retract_offer(store, driver.id, &offer).await? {
            debug!(order_id = %offer.order_id, driver_id = %driver.id, "cleared orphaned offer");
            cleared += 1;
        }
    }

    Ok(cleared)
}
