use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::notify::NotificationDispatcher;
use crate::error::AppError;
use crate::models::assignment::DriverAssignment;
use crate::models::driver::OfferRef;
use crate::models::order::{Order, OrderStatus};
use crate::store::AssignmentStore;

/// A driver picked upstream for this round, with its pre-computed estimates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateOffer {
    pub driver_id: Uuid,
    pub estimated_distance: f64,
    pub estimated_time: f64,
}

/// Opens assignment rounds: records the pending assignments, points each
/// candidate at the order, then notifies them.
pub struct Dispatcher {
    store: Arc<dyn AssignmentStore>,
    notifier: Arc<dyn NotificationDispatcher>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn AssignmentStore>, notifier: Arc<dyn NotificationDispatcher>) -> Self {
        Self { store, notifier }
    }

    pub async fn start_round(
        &self,
        order_id: Uuid,
        candidates: Vec<CandidateOffer>,
    ) -> Result<Order, AppError> {
        if candidates.is_empty() {
            return Err(AppError::InvalidArgument(
                "at least one candidate is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = candidates.iter().find(|c| !seen.insert(c.driver_id)) {
            return Err(AppError::InvalidArgument(format!(
                "driver {} listed twice",
                dup.driver_id
            )));
        }

        for candidate in &candidates {
            let driver = self.store.get_driver(candidate.driver_id).await?;
            if !driver.is_active {
                return Err(AppError::Conflict(format!("driver {} is offline", driver.id)));
            }
            if let Some(other) = driver.offered_order().filter(|id| *id != order_id) {
                return Err(AppError::Conflict(format!(
                    "driver {} already has a pending offer for order {other}",
                    driver.id
                )));
            }
        }

        let assigned_at = Utc::now();
        let order = self
            .store
            .transact_order(order_id, &mut |current| {
                if !matches!(
                    current.status,
                    OrderStatus::Pending | OrderStatus::ReassignNeeded
                ) {
                    return Err(AppError::Conflict(format!(
                        "order {order_id} is {:?} and cannot be dispatched",
                        current.status
                    )));
                }

                let mut next = current.clone();
                next.status = OrderStatus::AssignmentPending;
                next.assignments = candidates
                    .iter()
                    .map(|c| {
                        DriverAssignment::pending(
                            c.driver_id,
                            assigned_at,
                            c.estimated_distance,
                            c.estimated_time,
                        )
                    })
                    .collect();
                next.assigned_driver_id = None;
                next.claimed_at = None;

                Ok(Some(next))
            })
            .await?;

        info!(
            order_id = %order_id,
            candidates = candidates.len(),
            "assignment round started"
        );

        for candidate in &candidates {
            let offer = OfferRef {
                order_id,
                assigned_at,
                estimated_distance: candidate.estimated_distance,
                estimated_time: candidate.estimated_time,
            };

            let mut placed = false;
            let result = self
                .store
                .transact_driver(candidate.driver_id, &mut |current| {
                    placed = false;
                    if current.offered_order().is_some_and(|id| id != order_id) {
                        return Ok(None);
                    }
                    let mut next = current.clone();
                    next.offer_ref = Some(offer.clone());
                    next.updated_at = Utc::now();
                    placed = true;
                    Ok(Some(next))
                })
                .await;

            match result {
                Ok(_) if placed => {
                    // A candidate may already have claimed or rejected while
                    // earlier offers went out. Its offer clear then found
                    // nothing to clear, so take the reference back here.
                    match self.store.get_order(order_id).await {
                        Ok(current) if current.offer_is_live(candidate.driver_id, &offer) => {
                            self.notifier.offer(candidate.driver_id, &offer).await;
                        }
                        Ok(_) => {
                            debug!(
                                order_id = %order_id,
                                driver_id = %candidate.driver_id,
                                "offer answered before it was placed; retracting"
                            );
                            self.retract(candidate.driver_id, &offer).await;
                        }
                        Err(err) => {
                            warn!(
                                order_id = %order_id,
                                driver_id = %candidate.driver_id,
                                error = %err,
                                "could not recheck placed offer; keeping it"
                            );
                            self.notifier.offer(candidate.driver_id, &offer).await;
                        }
                    }
                }
                Ok(_) => warn!(
                    order_id = %order_id,
                    driver_id = %candidate.driver_id,
                    "driver picked up another offer mid-dispatch; left to expiry"
                ),
                Err(err) => warn!(
                    order_id = %order_id,
                    driver_id = %candidate.driver_id,
                    error = %err,
                    "failed to place offer"
                ),
            }
        }

        Ok(order)
    }

    async fn retract(&self, driver_id: Uuid, offer: &OfferRef) {
        if let Err(err) = retract_offer(self.store.as_ref(), driver_id, offer).await {
            warn!(
                order_id = %offer.order_id,
                driver_id = %driver_id,
                error = %err,
                "failed to retract offer; left to the sweeper"
            );
        }
    }
}

/// Clears `driver_id`'s offer if it is still exactly `offer`. Returns whether
/// anything was cleared.
pub(crate) async fn retract_offer(
    store: &dyn AssignmentStore,
    driver_id: Uuid,
    offer: &OfferRef,
) -> Result<bool, AppError> {
    let mut cleared = false;
    store
        .transact_driver(driver_id, &mut |current| {
            cleared = false;
            let mut next = current.clone();
            if !next.clear_offer_if(offer) {
                return Ok(None);
            }
            next.updated_at = Utc::now();
            cleared = true;
            Ok(Some(next))
        })
        .await?;
    Ok(cleared)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::{CandidateOffer, Dispatcher};
    use crate::engine::claim::ClaimCoordinator;
    use crate::engine::notify::NotificationDispatcher;
    use crate::error::AppError;
    use crate::models::assignment::AssignmentStatus;
    use crate::models::driver::{DriverRecord, OfferRef};
    use crate::models::order::{Order, OrderStatus};
    use crate::observability::metrics::Metrics;
    use crate::store::{AssignmentStore, InMemoryStore};

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(Uuid, Uuid)>>,
    }

    #[async_trait]
    impl NotificationDispatcher for RecordingNotifier {
        async fn offer(&self, driver_id: Uuid, offer: &OfferRef) {
            self.sent.lock().unwrap().push((driver_id, offer.order_id));
        }
    }

    /// Has one candidate answer the moment the first offer goes out, before
    /// the rest of the round is placed.
    struct EagerAnswer {
        coordinator: ClaimCoordinator,
        driver_id: Uuid,
        claim: bool,
        answered: AtomicBool,
    }

    #[async_trait]
    impl NotificationDispatcher for EagerAnswer {
        async fn offer(&self, _driver_id: Uuid, offer: &OfferRef) {
            if self.answered.swap(true, Ordering::SeqCst) {
                return;
            }
            if self.claim {
                self.coordinator
                    .claim(Some(self.driver_id), offer.order_id)
                    .await
                    .unwrap();
            } else {
                self.coordinator
                    .reject(Some(self.driver_id), offer.order_id)
                    .await
                    .unwrap();
            }
        }
    }

    fn candidate(driver_id: Uuid) -> CandidateOffer {
        CandidateOffer {
            driver_id,
            estimated_distance: 3.1,
            estimated_time: 11.0,
        }
    }

    async fn setup(drivers: &[u128]) -> (Arc<InMemoryStore>, Arc<RecordingNotifier>, Dispatcher) {
        let store = Arc::new(InMemoryStore::new(8, 64));
        let notifier = Arc::new(RecordingNotifier::default());
        store
            .insert_order(Order::new(
                Uuid::from_u128(1),
                "4 Mill Lane".to_string(),
                "77 Quay St".to_string(),
            ))
            .await
            .unwrap();
        for seed in drivers {
            store
                .insert_driver(DriverRecord::new(Uuid::from_u128(*seed), format!("d{seed}")))
                .await
                .unwrap();
        }
        let dispatcher = Dispatcher::new(store.clone(), notifier.clone());
        (store, notifier, dispatcher)
    }

    #[tokio::test]
    async fn round_records_assignments_offers_and_notifications() {
        let (store, notifier, dispatcher) = setup(&[10, 11]).await;
        let order_id = Uuid::from_u128(1);

        let order = dispatcher
            .start_round(
                order_id,
                vec![candidate(Uuid::from_u128(10)), candidate(Uuid::from_u128(11))],
            )
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::AssignmentPending);
        assert_eq!(order.assignments.len(), 2);
        assert!(order.assignments.iter().all(|a| a.is_pending()));

        for seed in [10, 11] {
            let driver = store.get_driver(Uuid::from_u128(seed)).await.unwrap();
            assert_eq!(driver.offered_order(), Some(order_id));
        }
        assert_eq!(notifier.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn bad_candidate_lists_are_refused() {
        let (_store, _notifier, dispatcher) = setup(&[10]).await;
        let order_id = Uuid::from_u128(1);

        let err = dispatcher.start_round(order_id, vec![]).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));

        let twice = vec![candidate(Uuid::from_u128(10)), candidate(Uuid::from_u128(10))];
        let err = dispatcher.start_round(order_id, twice).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));

        let err = dispatcher
            .start_round(order_id, vec![candidate(Uuid::from_u128(99))])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn open_round_cannot_be_dispatched_again() {
        let (_store, _notifier, dispatcher) = setup(&[10, 11]).await;
        let order_id = Uuid::from_u128(1);

        dispatcher
            .start_round(order_id, vec![candidate(Uuid::from_u128(10))])
            .await
            .unwrap();
        let err = dispatcher
            .start_round(order_id, vec![candidate(Uuid::from_u128(11))])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn reassignment_starts_a_fresh_round() {
        let (store, _notifier, dispatcher) = setup(&[10, 11, 12]).await;
        let order_id = Uuid::from_u128(1);
        let coordinator = ClaimCoordinator::new(store.clone(), Metrics::new());

        dispatcher
            .start_round(
                order_id,
                vec![candidate(Uuid::from_u128(10)), candidate(Uuid::from_u128(11))],
            )
            .await
            .unwrap();
        coordinator.reject(Some(Uuid::from_u128(10)), order_id).await.unwrap();
        coordinator.reject(Some(Uuid::from_u128(11)), order_id).await.unwrap();
        assert_eq!(
            store.get_order(order_id).await.unwrap().status,
            OrderStatus::ReassignNeeded
        );

        let order = dispatcher
            .start_round(order_id, vec![candidate(Uuid::from_u128(12))])
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::AssignmentPending);
        assert_eq!(order.assignments.len(), 1);
        assert_eq!(order.assignments[0].status, AssignmentStatus::Pending);
        assert!(order.assignment_for(Uuid::from_u128(10)).is_none());
    }

    #[tokio::test]
    async fn driver_busy_with_another_offer_is_refused() {
        let (store, _notifier, dispatcher) = setup(&[10]).await;
        store
            .insert_order(Order::new(
                Uuid::from_u128(2),
                "4 Mill Lane".to_string(),
                "1 Pier Rd".to_string(),
            ))
            .await
            .unwrap();

        dispatcher
            .start_round(Uuid::from_u128(2), vec![candidate(Uuid::from_u128(10))])
            .await
            .unwrap();
        let err = dispatcher
            .start_round(Uuid::from_u128(1), vec![candidate(Uuid::from_u128(10))])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    async fn eager_round(answer_as: u128, claim: bool) -> Arc<InMemoryStore> {
        let (store, _notifier, _dispatcher) = setup(&[10, 11]).await;
        let notifier = Arc::new(EagerAnswer {
            coordinator: ClaimCoordinator::new(store.clone(), Metrics::new()),
            driver_id: Uuid::from_u128(answer_as),
            claim,
            answered: AtomicBool::new(false),
        });
        let dispatcher = Dispatcher::new(store.clone(), notifier);

        dispatcher
            .start_round(
                Uuid::from_u128(1),
                vec![candidate(Uuid::from_u128(10)), candidate(Uuid::from_u128(11))],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn claim_before_placement_leaves_no_stale_offer() {
        let store = eager_round(10, true).await;
        let order_id = Uuid::from_u128(1);

        let order = store.get_order(order_id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Assigned);
        assert_eq!(
            order.assignment_for(Uuid::from_u128(11)).unwrap().status,
            AssignmentStatus::Rejected
        );

        let late = store.get_driver(Uuid::from_u128(11)).await.unwrap();
        assert!(late.offer_ref.is_none());
        let winner = store.get_driver(Uuid::from_u128(10)).await.unwrap();
        assert!(winner.offer_ref.is_none());
        assert_eq!(winner.in_progress_order_id, Some(order_id));

        // The late candidate is free for the next round.
        store
            .insert_order(Order::new(
                Uuid::from_u128(2),
                "4 Mill Lane".to_string(),
                "1 Pier Rd".to_string(),
            ))
            .await
            .unwrap();
        let next = Dispatcher::new(store.clone(), Arc::new(RecordingNotifier::default()));
        next.start_round(Uuid::from_u128(2), vec![candidate(Uuid::from_u128(11))])
            .await
            .unwrap();
        assert_eq!(
            store.get_driver(Uuid::from_u128(11)).await.unwrap().offered_order(),
            Some(Uuid::from_u128(2))
        );
    }

    #[tokio::test]
    async fn reject_before_placement_leaves_no_stale_offer() {
        let store = eager_round(11, false).await;

        let order = store.get_order(Uuid::from_u128(1)).await.unwrap();
        assert_eq!(order.status, OrderStatus::AssignmentPending);
        assert_eq!(
            order.assignment_for(Uuid::from_u128(11)).unwrap().status,
            AssignmentStatus::Rejected
        );

        assert!(store.get_driver(Uuid::from_u128(11)).await.unwrap().offer_ref.is_none());
        assert_eq!(
            store.get_driver(Uuid::from_u128(10)).await.unwrap().offered_order(),
            Some(Uuid::from_u128(1))
        );
    }
}
