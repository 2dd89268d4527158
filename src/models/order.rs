use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::assignment::{AssignmentStatus, DriverAssignment};
use crate::models::driver::OfferRef;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    AssignmentPending,
    Assigned,
    ReassignNeeded,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub pickup_address: String,
    pub dropoff_address: String,
    pub status: OrderStatus,
    pub assignments: Vec<DriverAssignment>,
    pub assigned_driver_id: Option<Uuid>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(id: Uuid, pickup_address: String, dropoff_address: String) -> Self {
        Self {
            id,
            pickup_address,
            dropoff_address,
            status: OrderStatus::Pending,
            assignments: Vec::new(),
            assigned_driver_id: None,
            claimed_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn assignment_for(&self, driver_id: Uuid) -> Option<&DriverAssignment> {
        self.assignments.iter().find(|a| a.driver_id == driver_id)
    }

    pub fn assignment_for_mut(&mut self, driver_id: Uuid) -> Option<&mut DriverAssignment> {
        self.assignments.iter_mut().find(|a| a.driver_id == driver_id)
    }

    pub fn accepted(&self) -> Option<&DriverAssignment> {
        self.assignments
            .iter()
            .find(|a| a.status == AssignmentStatus::Accepted)
    }

    pub fn candidate_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.assignments.iter().map(|a| a.driver_id)
    }

    /// True once every candidate has rejected and nobody is left to answer.
    pub fn all_rejected(&self) -> bool {
        !self.assignments.is_empty()
            && self
                .assignments
                .iter()
                .all(|a| a.status == AssignmentStatus::Rejected)
    }

    /// Whether `offer` still belongs to a pending assignment of this order.
    /// A reference left over from an answered or replaced round is not live.
    pub fn offer_is_live(&self, driver_id: Uuid, offer: &OfferRef) -> bool {
        offer.order_id == self.id
            && self
                .assignment_for(driver_id)
                .is_some_and(|a| a.is_pending() && a.assigned_at == offer.assigned_at)
    }

    /// Checks the status/assignment invariants. Run by the store before any
    /// order write is committed.
    pub fn check_invariants(&self) -> Result<(), String> {
        let accepted: Vec<&DriverAssignment> = self
            .assignments
            .iter()
            .filter(|a| a.status == AssignmentStatus::Accepted)
            .collect();

        if accepted.len() > 1 {
            return Err(format!(
                "order {} has {} accepted assignments",
                self.id,
                accepted.len()
            ));
        }

        let assigned = self.status == OrderStatus::Assigned;
        if assigned != (accepted.len() == 1) {
            return Err(format!(
                "order {} status {:?} disagrees with {} accepted assignments",
                self.id,
                self.status,
                accepted.len()
            ));
        }

        if let Some(winner) = accepted.first() {
            if self.assigned_driver_id != Some(winner.driver_id) {
                return Err(format!(
                    "order {} assigned_driver_id does not match accepted driver",
                    self.id
                ));
            }
        }

        let reassign = self.status == OrderStatus::ReassignNeeded;
        if reassign != self.all_rejected() {
            return Err(format!(
                "order {} status {:?} disagrees with its rejections",
                self.id, self.status
            ));
        }

        let mut seen = std::collections::HashSet::new();
        if !self.assignments.iter().all(|a| seen.insert(a.driver_id)) {
            return Err(format!("order {} lists a driver twice", self.id));
        }

        Ok(())
    }
}
