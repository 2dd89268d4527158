use async_trait::async_trait;
use dashmap::DashMap;
use prometheus::IntCounter;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::DriverRecord;
use crate::models::order::{Order, OrderStatus};
use crate::store::{AssignmentStore, DriverMutation, OrderMutation};

struct VersionedOrder {
    version: u64,
    order: Order,
}

struct DriverSlot {
    version: u64,
    tx: watch::Sender<DriverRecord>,
}

/// Optimistic, per-document versioned store. Mutations run without holding
/// any map guard and commit only if the version they read is still current.
pub struct InMemoryStore {
    orders: DashMap<Uuid, VersionedOrder>,
    drivers: DashMap<Uuid, DriverSlot>,
    order_events_tx: broadcast::Sender<Order>,
    max_attempts: u32,
    conflicts: Option<IntCounter>,
}

impl InMemoryStore {
    pub fn new(max_attempts: u32, event_buffer_size: usize) -> Self {
        let (order_events_tx, _unused_rx) = broadcast::channel(event_buffer_size.max(1));

        Self {
            orders: DashMap::new(),
            drivers: DashMap::new(),
            order_events_tx,
            max_attempts: max_attempts.max(1),
            conflicts: None,
        }
    }

    pub fn with_conflict_counter(mut self, counter: IntCounter) -> Self {
        self.conflicts = Some(counter);
        self
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn driver_count(&self) -> usize {
        self.drivers.len()
    }

    fn record_conflict(&self, kind: &str, id: Uuid, attempt: u32) {
        debug!(kind, id = %id, attempt, "transaction conflict; retrying");
        if let Some(counter) = &self.conflicts {
            counter.inc();
        }
    }
}

#[async_trait]
impl AssignmentStore for InMemoryStore {
    async fn get_order(&self, order_id: Uuid) -> Result<Order, AppError> {
        self.orders
            .get(&order_id)
            .map(|entry| entry.order.clone())
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))
    }

    async fn get_driver(&self, driver_id: Uuid) -> Result<DriverRecord, AppError> {
        self.drivers
            .get(&driver_id)
            .map(|slot| slot.tx.borrow().clone())
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))
    }

    async fn insert_order(&self, order: Order) -> Result<Order, AppError> {
        if order.status != OrderStatus::Pending || !order.assignments.is_empty() {
            return Err(AppError::InvalidArgument(
                "new orders must be pending with no assignments".to_string(),
            ));
        }

        match self.orders.entry(order.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "order {} already exists",
                order.id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(VersionedOrder {
                    version: 0,
                    order: order.clone(),
                });
                let _ = self.order_events_tx.send(order.clone());
                Ok(order)
            }
        }
    }

    async fn insert_driver(&self, driver: DriverRecord) -> Result<DriverRecord, AppError> {
        if driver.offer_ref.is_some() {
            return Err(AppError::InvalidArgument(
                "new drivers cannot carry an offer".to_string(),
            ));
        }

        match self.drivers.entry(driver.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "driver {} already exists",
                driver.id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let (tx, _unused_rx) = watch::channel(driver.clone());
                slot.insert(DriverSlot { version: 0, tx });
                Ok(driver)
            }
        }
    }

    async fn transact_order(
        &self,
        order_id: Uuid,
        mutate: OrderMutation<'_>,
    ) -> Result<Order, AppError> {
        for attempt in 1..=self.max_attempts {
            let (version, snapshot) = {
                let entry = self
                    .orders
                    .get(&order_id)
                    .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
                (entry.version, entry.order.clone())
            };

            let Some(next) = mutate(&snapshot)? else {
                return Ok(snapshot);
            };

            if next.id != order_id {
                return Err(AppError::Internal(format!(
                    "transaction on order {order_id} tried to write order {}",
                    next.id
                )));
            }
            if let Err(violation) = next.check_invariants() {
                error!(order_id = %order_id, violation = %violation, "refusing order write");
                return Err(AppError::Internal(violation));
            }

            {
                let mut entry = self
                    .orders
                    .get_mut(&order_id)
                    .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
                if entry.version == version {
                    entry.version += 1;
                    entry.order = next.clone();
                    drop(entry);
                    let _ = self.order_events_tx.send(next.clone());
                    return Ok(next);
                }
            }

            self.record_conflict("order", order_id, attempt);
            tokio::task::yield_now().await;
        }

        Err(AppError::Unavailable(format!(
            "order {order_id} is contended; gave up after {} attempts",
            self.max_attempts
        )))
    }

    async fn transact_driver(
        &self,
        driver_id: Uuid,
        mutate: DriverMutation<'_>,
    ) -> Result<DriverRecord, AppError> {
        for attempt in 1..=self.max_attempts {
            let (version, snapshot) = {
                let slot = self
                    .drivers
                    .get(&driver_id)
                    .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;
                let current = slot.tx.borrow().clone();
                (slot.version, current)
            };

            let Some(next) = mutate(&snapshot)? else {
                return Ok(snapshot);
            };

            if next.id != driver_id {
                return Err(AppError::Internal(format!(
                    "transaction on driver {driver_id} tried to write driver {}",
                    next.id
                )));
            }

            {
                let mut slot = self
                    .drivers
                    .get_mut(&driver_id)
                    .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;
                if slot.version == version {
                    slot.version += 1;
                    slot.tx.send_replace(next.clone());
                    return Ok(next);
                }
            }

            self.record_conflict("driver", driver_id, attempt);
            tokio::task::yield_now().await;
        }

        Err(AppError::Unavailable(format!(
            "driver {driver_id} is contended; gave up after {} attempts",
            self.max_attempts
        )))
    }

    async fn orders_with_status(&self, status: OrderStatus) -> Result<Vec<Order>, AppError> {
        Ok(self
            .orders
            .iter()
            .filter(|entry| entry.order.status == status)
            .map(|entry| entry.order.clone())
            .collect())
    }

    async fn drivers_with_offer(&self) -> Result<Vec<DriverRecord>, AppError> {
        Ok(self
            .drivers
            .iter()
            .map(|slot| slot.tx.borrow().clone())
            .filter(|driver| driver.offer_ref.is_some())
            .collect())
    }

    fn subscribe_driver(&self, driver_id: Uuid) -> Result<watch::Receiver<DriverRecord>, AppError> {
        self.drivers
            .get(&driver_id)
            .map(|slot| slot.tx.subscribe())
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))
    }

    fn subscribe_orders(&self) -> broadcast::Receiver<Order> {
        self.order_events_tx.subscribe()
    }
}
