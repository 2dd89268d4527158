pub mod memory;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::DriverRecord;
use crate::models::order::{Order, OrderStatus};

pub use memory::InMemoryStore;

/// Mutation applied inside an order transaction. `Ok(None)` aborts without
/// writing; the closure may run more than once when the transaction retries.
pub type OrderMutation<'a> =
    &'a mut (dyn FnMut(&Order) -> Result<Option<Order>, AppError> + Send);

pub type DriverMutation<'a> =
    &'a mut (dyn FnMut(&DriverRecord) -> Result<Option<DriverRecord>, AppError> + Send);

/// Durable home of orders and driver records.
///
/// Writes to `Order::status`, `Order::assignments` and `DriverRecord::offer_ref`
/// only happen through `transact_order`/`transact_driver`, and every committed
/// order is checked against its invariants first.
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn get_order(&self, order_id: Uuid) -> Result<Order, AppError>;

    async fn get_driver(&self, driver_id: Uuid) -> Result<DriverRecord, AppError>;

    /// Registers a new order. It must be `Pending` with no assignments.
    async fn insert_order(&self, order: Order) -> Result<Order, AppError>;

    /// Registers a new driver. It must not carry an offer.
    async fn insert_driver(&self, driver: DriverRecord) -> Result<DriverRecord, AppError>;

    /// Serializable read-modify-write of one order. Returns the committed order,
    /// or the current one if the mutation aborted.
    async fn transact_order(
        &self,
        order_id: Uuid,
        mutate: OrderMutation<'_>,
    ) -> Result<Order, AppError>;

    async fn transact_driver(
        &self,
        driver_id: Uuid,
        mutate: DriverMutation<'_>,
    ) -> Result<DriverRecord, AppError>;

    async fn orders_with_status(&self, status: OrderStatus) -> Result<Vec<Order>, AppError>;

    /// Drivers currently holding an offer reference.
    async fn drivers_with_offer(&self) -> Result<Vec<DriverRecord>, AppError>;

    fn subscribe_driver(&self, driver_id: Uuid) -> Result<watch::Receiver<DriverRecord>, AppError>;

    fn subscribe_orders(&self) -> broadcast::Receiver<Order>;
}
