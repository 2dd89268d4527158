use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use order_claim::client::{
    ClaimClient, ControllerHandle, ControllerSettings, ControllerState, DriverRequestWatcher,
    DriverSession, HttpClaimClient, LocalClaimClient, Resolution,
};
use order_claim::engine::claim::ClaimOutcome;
use order_claim::engine::dispatch::CandidateOffer;
use order_claim::error::AppError;
use order_claim::models::assignment::AssignmentStatus;
use order_claim::models::driver::{DriverRecord, OfferRef};
use order_claim::models::order::{Order, OrderStatus};
use order_claim::state::AppState;
use order_claim::store::AssignmentStore;
use tokio::sync::watch;
use uuid::Uuid;

async fn seed(state: &AppState, drivers: usize) -> (Uuid, Vec<Uuid>) {
    let order_id = Uuid::new_v4();
    state
        .store
        .insert_order(Order::new(
            order_id,
            "40 Harbour Rd".to_string(),
            "7 Mill Ln".to_string(),
        ))
        .await
        .unwrap();

    let mut ids = Vec::with_capacity(drivers);
    for n in 0..drivers {
        let id = Uuid::new_v4();
        state
            .store
            .insert_driver(DriverRecord::new(id, format!("driver-{n}")))
            .await
            .unwrap();
        ids.push(id);
    }

    let candidates = ids
        .iter()
        .enumerate()
        .map(|(n, id)| CandidateOffer {
            driver_id: *id,
            estimated_distance: 1.0 + n as f64,
            estimated_time: 4.0 + n as f64,
        })
        .collect();
    state.dispatcher.start_round(order_id, candidates).await.unwrap();

    (order_id, ids)
}

async fn race_claims(candidates: usize) {
    let state = Arc::new(AppState::new(32, 64));
    let (order_id, drivers) = seed(&state, candidates).await;

    let tasks: Vec<_> = drivers
        .iter()
        .map(|driver| {
            let coordinator = state.coordinator.clone();
            let driver = *driver;
            tokio::spawn(async move { (driver, coordinator.claim(Some(driver), order_id).await) })
        })
        .collect();

    let mut winners = Vec::new();
    for task in tasks {
        let (driver, result) = task.await.unwrap();
        match result.unwrap() {
            ClaimOutcome::Success => winners.push(driver),
            ClaimOutcome::AlreadyTaken => {}
        }
    }
    assert_eq!(winners.len(), 1, "exactly one claim must win");

    let order = state.store.get_order(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Assigned);
    assert_eq!(order.assigned_driver_id, Some(winners[0]));
    for assignment in &order.assignments {
        let expected = if assignment.driver_id == winners[0] {
            AssignmentStatus::Accepted
        } else {
            AssignmentStatus::Rejected
        };
        assert_eq!(assignment.status, expected);
    }

    for driver in &drivers {
        let record = state.store.get_driver(*driver).await.unwrap();
        assert!(record.offer_ref.is_none());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_simultaneous_claims_have_one_winner() {
    race_claims(2).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_simultaneous_claims_have_one_winner() {
    race_claims(3).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn five_simultaneous_claims_have_one_winner() {
    race_claims(5).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_rejections_reach_reassignment() {
    let state = Arc::new(AppState::new(32, 64));
    let (order_id, drivers) = seed(&state, 4).await;

    let tasks: Vec<_> = drivers
        .iter()
        .map(|driver| {
            let coordinator = state.coordinator.clone();
            let driver = *driver;
            tokio::spawn(async move { coordinator.reject(Some(driver), order_id).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let order = state.store.get_order(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::ReassignNeeded);
    assert!(order.all_rejected());
    assert!(order.assigned_driver_id.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn claim_racing_rejections_keeps_the_order_consistent() {
    let state = Arc::new(AppState::new(32, 64));
    let (order_id, drivers) = seed(&state, 3).await;

    let claimer = drivers[0];
    let claim = {
        let coordinator = state.coordinator.clone();
        tokio::spawn(async move { coordinator.claim(Some(claimer), order_id).await })
    };
    let rejects: Vec<_> = drivers[1..]
        .iter()
        .map(|driver| {
            let coordinator = state.coordinator.clone();
            let driver = *driver;
            tokio::spawn(async move { coordinator.reject(Some(driver), order_id).await })
        })
        .collect();

    assert_eq!(claim.await.unwrap().unwrap(), ClaimOutcome::Success);
    for reject in rejects {
        reject.await.unwrap().unwrap();
    }

    let order = state.store.get_order(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Assigned);
    assert_eq!(order.assigned_driver_id, Some(claimer));
    assert!(order.check_invariants().is_ok());
}

#[tokio::test]
async fn driver_session_claims_through_the_local_client() {
    let state = Arc::new(AppState::new(16, 64));
    let (order_id, drivers) = seed(&state, 2).await;
    let (driver, rival) = (drivers[0], drivers[1]);

    let offers = DriverRequestWatcher::spawn(state.store.clone(), driver).unwrap();
    let client: Arc<dyn ClaimClient> =
        Arc::new(LocalClaimClient::new(state.coordinator.clone(), Some(driver)));
    let mut current = DriverSession::spawn(offers, client, ControllerSettings::default());

    let handle = current
        .wait_for(|handle| handle.is_some())
        .await
        .unwrap()
        .clone()
        .unwrap();
    assert_eq!(handle.order_id(), order_id);

    handle.accept();
    assert_eq!(handle.resolution().await, Resolution::Claimed);

    let order = state.store.get_order(order_id).await.unwrap();
    assert_eq!(order.assigned_driver_id, Some(driver));
    assert_eq!(
        state.coordinator.claim(Some(rival), order_id).await.unwrap(),
        ClaimOutcome::AlreadyTaken
    );

    // The claim cleared the offer; the resolved controller stays readable.
    assert!(state.store.get_driver(driver).await.unwrap().offer_ref.is_none());
    tokio::time::sleep(Duration::from_millis(50)).await;
    let kept = current.borrow().clone().unwrap();
    assert_eq!(kept.order_id(), order_id);
    assert_eq!(kept.state(), ControllerState::Resolved(Resolution::Claimed));
}

fn start_session(state: &AppState, driver: Uuid) -> watch::Receiver<Option<ControllerHandle>> {
    let offers = DriverRequestWatcher::spawn(state.store.clone(), driver).unwrap();
    let client: Arc<dyn ClaimClient> =
        Arc::new(LocalClaimClient::new(state.coordinator.clone(), Some(driver)));
    DriverSession::spawn(offers, client, ControllerSettings::default())
}

async fn controller_for(
    current: &mut watch::Receiver<Option<ControllerHandle>>,
    order_id: Uuid,
) -> ControllerHandle {
    current
        .wait_for(|handle| handle.as_ref().is_some_and(|h| h.order_id() == order_id))
        .await
        .unwrap()
        .clone()
        .unwrap()
}

#[tokio::test]
async fn rival_claim_withdraws_the_losing_drivers_offer() {
    let state = Arc::new(AppState::new(16, 64));
    let (order_id, drivers) = seed(&state, 2).await;
    let (rival, loser) = (drivers[0], drivers[1]);

    let mut current = start_session(&state, loser);
    let handle = controller_for(&mut current, order_id).await;

    assert_eq!(
        state.coordinator.claim(Some(rival), order_id).await.unwrap(),
        ClaimOutcome::Success
    );
    assert_eq!(handle.resolution().await, Resolution::Withdrawn);

    let kept = current.borrow().clone().unwrap();
    assert_eq!(kept.order_id(), order_id);
    assert_eq!(kept.state(), ControllerState::Resolved(Resolution::Withdrawn));

    // A withdrawn offer never reaches the server as an answer.
    let order = state.store.get_order(order_id).await.unwrap();
    assert_eq!(order.assigned_driver_id, Some(rival));
}

#[tokio::test]
async fn offer_moving_to_another_order_gets_a_fresh_controller() {
    let state = Arc::new(AppState::new(16, 64));
    let (first_order, drivers) = seed(&state, 1).await;
    let driver = drivers[0];

    let second_order = Uuid::new_v4();
    state
        .store
        .insert_order(Order::new(
            second_order,
            "5 Dock St".to_string(),
            "12 Hill Rd".to_string(),
        ))
        .await
        .unwrap();

    let mut current = start_session(&state, driver);
    let first = controller_for(&mut current, first_order).await;
    let mut first_states = first.watch_state();
    first_states
        .wait_for(|s| *s == ControllerState::Offered)
        .await
        .unwrap();

    let moved = OfferRef {
        order_id: second_order,
        assigned_at: Utc::now(),
        estimated_distance: 3.0,
        estimated_time: 8.0,
    };
    state
        .store
        .transact_driver(driver, &mut |record| {
            let mut next = record.clone();
            next.offer_ref = Some(moved.clone());
            Ok(Some(next))
        })
        .await
        .unwrap();

    let second = controller_for(&mut current, second_order).await;
    assert_eq!(first.resolution().await, Resolution::Withdrawn);

    let mut states = second.watch_state();
    states
        .wait_for(|s| *s == ControllerState::Offered)
        .await
        .unwrap();
    assert_eq!(second.offer().offer_ref, moved);
    assert_eq!(first.state(), ControllerState::Resolved(Resolution::Withdrawn));
}

#[tokio::test]
async fn http_client_maps_callable_results() {
    let state = Arc::new(AppState::new(16, 64));
    let (order_id, drivers) = seed(&state, 2).await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = order_claim::api::rest::router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let base_url = format!("http://{addr}");

    let winner = HttpClaimClient::new(&base_url, drivers[0], Duration::from_secs(5)).unwrap();
    let loser = HttpClaimClient::new(&base_url, drivers[1], Duration::from_secs(5)).unwrap();
    let outsider = HttpClaimClient::new(&base_url, Uuid::new_v4(), Duration::from_secs(5)).unwrap();

    let won = winner.claim_order(order_id).await.unwrap();
    assert!(won.success);

    let lost = loser.claim_order(order_id).await.unwrap();
    assert!(!lost.success);
    assert_eq!(lost.already_taken, Some(true));

    let denied = outsider.reject_order(order_id).await.unwrap_err();
    assert!(matches!(denied, AppError::PermissionDenied(_)));

    let missing = winner.claim_order(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(missing, AppError::NotFound(_)));
}
