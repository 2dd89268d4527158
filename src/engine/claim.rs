use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::assignment::AssignmentStatus;
use crate::models::order::OrderStatus;
use crate::observability::metrics::Metrics;
use crate::store::AssignmentStore;

const OFFER_CLEAR_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimOutcome {
    Success,
    /// Another candidate's claim committed first. Expected, not a failure.
    AlreadyTaken,
}

/// Resolves the race between candidates of one order. All writes go through
/// per-order store transactions; the store's commit order picks the winner.
pub struct ClaimCoordinator {
    store: Arc<dyn AssignmentStore>,
    metrics: Metrics,
}

impl ClaimCoordinator {
    pub fn new(store: Arc<dyn AssignmentStore>, metrics: Metrics) -> Self {
        Self { store, metrics }
    }

    pub async fn claim(
        &self,
        caller: Option<Uuid>,
        order_id: Uuid,
    ) -> Result<ClaimOutcome, AppError> {
        let driver_id = caller.ok_or_else(|| {
            AppError::Unauthenticated("you must be authenticated to claim an order".to_string())
        })?;

        let start = Instant::now();
        let result = self.claim_as(driver_id, order_id).await;

        let outcome = match &result {
            Ok(ClaimOutcome::Success) => "success",
            Ok(ClaimOutcome::AlreadyTaken) => "already_taken",
            Err(_) => "error",
        };
        self.metrics
            .claim_latency_seconds
            .with_label_values(&[outcome])
            .observe(start.elapsed().as_secs_f64());
        self.metrics.claims_total.with_label_values(&[outcome]).inc();

        result
    }

    pub async fn reject(&self, caller: Option<Uuid>, order_id: Uuid) -> Result<(), AppError> {
        self.record_reject(caller, order_id).await.map(|_| ())
    }

    /// `reject`, reporting whether this call is the one that recorded the
    /// rejection. `false` means it was already rejected or claimed.
    pub(crate) async fn record_reject(
        &self,
        caller: Option<Uuid>,
        order_id: Uuid,
    ) -> Result<bool, AppError> {
        let driver_id = caller.ok_or_else(|| {
            AppError::Unauthenticated("you must be authenticated to reject an order".to_string())
        })?;

        let result = self.reject_as(driver_id, order_id).await;

        let outcome = if result.is_ok() { "success" } else { "error" };
        self.metrics
            .rejections_total
            .with_label_values(&[outcome])
            .inc();

        result
    }

    async fn claim_as(&self, driver_id: Uuid, order_id: Uuid) -> Result<ClaimOutcome, AppError> {
        let mut outcome = ClaimOutcome::Success;

        let order = self
            .store
            .transact_order(order_id, &mut |current| {
                outcome = ClaimOutcome::Success;

                let Some(own) = current.assignment_for(driver_id) else {
                    return Err(AppError::PermissionDenied(
                        "driver not in assigned list".to_string(),
                    ));
                };

                if current.accepted().is_some() {
                    outcome = ClaimOutcome::AlreadyTaken;
                    return Ok(None);
                }

                if own.status == AssignmentStatus::Rejected {
                    return Err(AppError::PermissionDenied(format!(
                        "offer for order {order_id} is no longer pending"
                    )));
                }

                let now = Utc::now();
                let mut next = current.clone();
                for assignment in &mut next.assignments {
                    if assignment.driver_id == driver_id {
                        assignment.accept(now);
                    } else {
                        assignment.reject(now);
                    }
                }
                next.status = OrderStatus::Assigned;
                next.assigned_driver_id = Some(driver_id);
                next.claimed_at = Some(now);

                Ok(Some(next))
            })
            .await?;

        match outcome {
            ClaimOutcome::Success => {
                info!(order_id = %order_id, driver_id = %driver_id, "order claimed");

                let losers: Vec<Uuid> = order
                    .candidate_ids()
                    .filter(|id| *id != driver_id)
                    .collect();
                let clears = losers
                    .iter()
                    .map(|loser| self.clear_offer(*loser, order_id, false));
                join_all(clears).await;
                self.clear_offer(driver_id, order_id, true).await;
            }
            ClaimOutcome::AlreadyTaken => {
                info!(order_id = %order_id, driver_id = %driver_id, "claim lost the race");
                self.clear_offer(driver_id, order_id, false).await;
            }
        }

        Ok(outcome)
    }

    async fn reject_as(&self, driver_id: Uuid, order_id: Uuid) -> Result<bool, AppError> {
        let mut changed = false;

        let order = self
            .store
            .transact_order(order_id, &mut |current| {
                changed = false;

                let Some(own) = current.assignment_for(driver_id) else {
                    return Err(AppError::PermissionDenied(
                        "driver not in assigned list".to_string(),
                    ));
                };

                // Already resolved by a claim, or already rejected: nothing to do.
                if current.accepted().is_some() || own.status == AssignmentStatus::Rejected {
                    return Ok(None);
                }

                let mut next = current.clone();
                if let Some(assignment) = next.assignment_for_mut(driver_id) {
                    assignment.reject(Utc::now());
                }
                if next.all_rejected() {
                    next.status = OrderStatus::ReassignNeeded;
                }
                changed = true;

                Ok(Some(next))
            })
            .await?;

        if changed {
            info!(order_id = %order_id, driver_id = %driver_id, "order rejected");
            if order.status == OrderStatus::ReassignNeeded {
                info!(order_id = %order_id, "every candidate rejected; order needs reassignment");
            }
        } else {
            debug!(order_id = %order_id, driver_id = %driver_id, "reject was a no-op");
        }

        self.clear_offer(driver_id, order_id, false).await;
        Ok(changed)
    }

    /// Drops `driver_id`'s offer for `order_id`, at least once. Failures are
    /// logged, never surfaced: the order transaction already committed.
    async fn clear_offer(&self, driver_id: Uuid, order_id: Uuid, won: bool) {
        for attempt in 1..=OFFER_CLEAR_ATTEMPTS {
            let result = self
                .store
                .transact_driver(driver_id, &mut |current| {
                    let mut next = current.clone();
                    let mut changed = next.clear_offer_for(order_id);
                    if won && next.in_progress_order_id != Some(order_id) {
                        next.in_progress_order_id = Some(order_id);
                        changed = true;
                    }
                    if !changed {
                        return Ok(None);
                    }
                    next.updated_at = Utc::now();
                    Ok(Some(next))
                })
                .await;

            match result {
                Ok(_) => return,
                Err(err) if err.is_retryable() && attempt < OFFER_CLEAR_ATTEMPTS => {
                    debug!(driver_id = %driver_id, attempt, error = %err, "retrying offer clear");
                }
                Err(err) => {
                    warn!(
                        order_id = %order_id,
                        driver_id = %driver_id,
                        error = %err,
                        "failed to clear driver offer"
                    );
                    return;
                }
            }
        }
    }
}
