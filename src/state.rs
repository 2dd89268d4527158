use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::Config;
use crate::engine::claim::ClaimCoordinator;
use crate::engine::dispatch::Dispatcher;
use crate::engine::notify::BroadcastNotifier;
use crate::models::event::DispatchEvent;
use crate::observability::metrics::Metrics;
use crate::store::InMemoryStore;

pub struct AppState {
    pub store: Arc<InMemoryStore>,
    pub coordinator: Arc<ClaimCoordinator>,
    pub dispatcher: Dispatcher,
    pub events_tx: broadcast::Sender<DispatchEvent>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(store_max_attempts: u32, event_buffer_size: usize) -> Self {
        let metrics = Metrics::new();
        let (events_tx, _unused_rx) = broadcast::channel(event_buffer_size.max(1));

        let store = Arc::new(
            InMemoryStore::new(store_max_attempts, event_buffer_size)
                .with_conflict_counter(metrics.transaction_conflicts_total.clone()),
        );
        let coordinator = Arc::new(ClaimCoordinator::new(store.clone(), metrics.clone()));
        let notifier = Arc::new(BroadcastNotifier::new(events_tx.clone()));
        let dispatcher = Dispatcher::new(store.clone(), notifier);

        Self {
            store,
            coordinator,
            dispatcher,
            events_tx,
            metrics,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.store_max_attempts, config.event_buffer_size)
    }
}
