use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AssignmentStatus {
    Pending,
    Accepted,
    Rejected,
}

/// One candidate's slot in an assignment round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverAssignment {
    pub driver_id: Uuid,
    pub status: AssignmentStatus,
    pub assigned_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub estimated_distance: f64,
    pub estimated_time: f64,
}

impl DriverAssignment {
    pub fn pending(
        driver_id: Uuid,
        assigned_at: DateTime<Utc>,
        estimated_distance: f64,
        estimated_time: f64,
    ) -> Self {
        Self {
            driver_id,
            status: AssignmentStatus::Pending,
            assigned_at,
            accepted_at: None,
            rejected_at: None,
            estimated_distance,
            estimated_time,
        }
    }

    pub fn accept(&mut self, at: DateTime<Utc>) {
        self.status = AssignmentStatus::Accepted;
        self.accepted_at = Some(at);
    }

    pub fn reject(&mut self, at: DateTime<Utc>) {
        self.status = AssignmentStatus::Rejected;
        self.rejected_at = Some(at);
    }

    pub fn is_pending(&self) -> bool {
        self.status == AssignmentStatus::Pending
    }
}
