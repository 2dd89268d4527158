use std::sync::Arc;
use std::time::Duration;

use futures::future::OptionFuture;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::ClaimClient;
use crate::client::watcher::Offer;
use crate::config::Config;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    pub response_window: Duration,
    /// User-triggered retries allowed after a retryable transport error.
    pub max_retries: u32,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            response_window: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

impl From<&Config> for ControllerSettings {
    fn from(config: &Config) -> Self {
        Self {
            response_window: Duration::from_secs(config.offer_timeout_secs),
            max_retries: config.max_resolve_retries,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferAction {
    Accept,
    Reject { auto: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Claimed,
    Rejected { auto: bool },
    /// Another driver's claim committed first.
    AlreadyTaken,
    Failed { message: String },
    /// The offer was cleared before the driver answered.
    Withdrawn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Offered,
    Resolving {
        action: OfferAction,
        attempt: u32,
        awaiting_retry: bool,
    },
    Resolved(Resolution),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Accept,
    Reject,
    Retry,
    Dismiss,
    Withdraw,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CallOutcome {
    Claimed,
    AlreadyTaken,
    Rejected,
    Refused(String),
}

/// Transition rules, kept free of timers and I/O.
struct OfferMachine {
    state: ControllerState,
    max_retries: u32,
}

impl OfferMachine {
    fn new(max_retries: u32) -> Self {
        Self {
            state: ControllerState::Idle,
            max_retries,
        }
    }

    fn offer(&mut self) {
        if self.state == ControllerState::Idle {
            self.state = ControllerState::Offered;
        }
    }

    /// The single `Offered -> Resolving` edge. Returns the action to submit,
    /// or `None` if something already won the transition.
    fn trigger(&mut self, action: OfferAction) -> Option<OfferAction> {
        if self.state != ControllerState::Offered {
            return None;
        }
        self.state = ControllerState::Resolving {
            action,
            attempt: 1,
            awaiting_retry: false,
        };
        Some(action)
    }

    fn retry(&mut self) -> Option<OfferAction> {
        match &mut self.state {
            ControllerState::Resolving {
                action,
                attempt,
                awaiting_retry,
            } if *awaiting_retry => {
                *attempt += 1;
                *awaiting_retry = false;
                Some(*action)
            }
            _ => None,
        }
    }

    fn dismiss(&mut self) {
        if let ControllerState::Resolving {
            action,
            awaiting_retry: true,
            ..
        } = self.state
        {
            self.state = ControllerState::Resolved(Resolution::Failed {
                message: failure_message(action, None),
            });
        }
    }

    fn withdraw(&mut self) {
        if self.state == ControllerState::Offered {
            self.state = ControllerState::Resolved(Resolution::Withdrawn);
        }
    }

    fn respond(&mut self, result: Result<CallOutcome, AppError>) {
        let ControllerState::Resolving {
            action, attempt, ..
        } = self.state
        else {
            return;
        };

        self.state = match result {
            Ok(CallOutcome::Claimed) => ControllerState::Resolved(Resolution::Claimed),
            Ok(CallOutcome::AlreadyTaken) => ControllerState::Resolved(Resolution::AlreadyTaken),
            Ok(CallOutcome::Rejected) => {
                let auto = matches!(action, OfferAction::Reject { auto: true });
                ControllerState::Resolved(Resolution::Rejected { auto })
            }
            Ok(CallOutcome::Refused(message)) => {
                ControllerState::Resolved(Resolution::Failed { message })
            }
            Err(err) if err.is_retryable() && attempt <= self.max_retries => {
                ControllerState::Resolving {
                    action,
                    attempt,
                    awaiting_retry: true,
                }
            }
            Err(err) => ControllerState::Resolved(Resolution::Failed {
                message: failure_message(action, Some(&err)),
            }),
        };
    }

    fn is_offered(&self) -> bool {
        self.state == ControllerState::Offered
    }

    fn is_resolved(&self) -> bool {
        matches!(self.state, ControllerState::Resolved(_))
    }
}

fn failure_message(action: OfferAction, err: Option<&AppError>) -> String {
    let message = match (action, err) {
        (_, Some(AppError::Unauthenticated(_))) => "You must be logged in to accept orders",
        (OfferAction::Accept, Some(AppError::PermissionDenied(_))) => {
            "You do not have permission to claim this order"
        }
        (_, Some(AppError::NotFound(_))) => "This order is no longer available",
        (_, Some(AppError::DeadlineExceeded(_))) => "Request timed out. Please try again.",
        (_, Some(AppError::Unavailable(_))) => "Service unavailable. Please try again.",
        (OfferAction::Accept, _) => "Failed to claim order",
        (OfferAction::Reject { .. }, _) => "Failed to reject order",
    };
    message.to_string()
}

async fn call(
    client: Arc<dyn ClaimClient>,
    order_id: Uuid,
    action: OfferAction,
) -> Result<CallOutcome, AppError> {
    match action {
        OfferAction::Accept => {
            let response = client.claim_order(order_id).await?;
            Ok(if response.success {
                CallOutcome::Claimed
            } else if response.already_taken.unwrap_or(false) {
                CallOutcome::AlreadyTaken
            } else {
                CallOutcome::Refused(
                    response
                        .message
                        .unwrap_or_else(|| "Failed to claim order".to_string()),
                )
            })
        }
        OfferAction::Reject { .. } => {
            let response = client.reject_order(order_id).await?;
            Ok(if response.success {
                CallOutcome::Rejected
            } else {
                CallOutcome::Refused(
                    response
                        .message
                        .unwrap_or_else(|| "Failed to reject order".to_string()),
                )
            })
        }
    }
}

/// Handle to one running offer. Cheap to clone; every clone drives the same
/// controller.
#[derive(Clone)]
pub struct ControllerHandle {
    offer: Offer,
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ControllerState>,
    remaining_rx: watch::Receiver<u64>,
}

impl ControllerHandle {
    pub fn offer(&self) -> &Offer {
        &self.offer
    }

    pub fn order_id(&self) -> Uuid {
        self.offer.order_id()
    }

    pub fn accept(&self) {
        let _ = self.commands.send(Command::Accept);
    }

    pub fn reject(&self) {
        let _ = self.commands.send(Command::Reject);
    }

    /// Re-submits the same action after a retryable failure.
    pub fn retry(&self) {
        let _ = self.commands.send(Command::Retry);
    }

    /// Gives up on a failed action instead of retrying.
    pub fn dismiss(&self) {
        let _ = self.commands.send(Command::Dismiss);
    }

    /// The offer disappeared upstream before the driver answered.
    pub fn withdraw(&self) {
        let _ = self.commands.send(Command::Withdraw);
    }

    pub fn state(&self) -> ControllerState {
        self.state_rx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ControllerState> {
        self.state_rx.clone()
    }

    /// Whole seconds left on the visible countdown.
    pub fn seconds_remaining(&self) -> u64 {
        *self.remaining_rx.borrow()
    }

    pub async fn resolution(&self) -> Resolution {
        let mut state_rx = self.state_rx.clone();
        let waited = state_rx
            .wait_for(|state| matches!(state, ControllerState::Resolved(_)))
            .await
            .map(|state| state.clone());

        match waited {
            Ok(ControllerState::Resolved(resolution)) => resolution,
            _ => match self.state_rx.borrow().clone() {
                ControllerState::Resolved(resolution) => resolution,
                _ => Resolution::Failed {
                    message: "offer controller stopped".to_string(),
                },
            },
        }
    }
}

/// Enforces the response window for one offer and submits exactly one
/// resolution. A new offer always gets a new controller.
pub struct ModalTimeoutController {
    offer: Offer,
    client: Arc<dyn ClaimClient>,
    settings: ControllerSettings,
    machine: OfferMachine,
    state_tx: watch::Sender<ControllerState>,
    remaining_tx: watch::Sender<u64>,
}

impl ModalTimeoutController {
    pub fn spawn(
        offer: Offer,
        client: Arc<dyn ClaimClient>,
        settings: ControllerSettings,
    ) -> ControllerHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ControllerState::Idle);
        let (remaining_tx, remaining_rx) = watch::channel(settings.response_window.as_secs());

        let controller = Self {
            offer: offer.clone(),
            client,
            settings,
            machine: OfferMachine::new(settings.max_retries),
            state_tx,
            remaining_tx,
        };
        tokio::spawn(controller.run(commands_rx));

        ControllerHandle {
            offer,
            commands: commands_tx,
            state_rx,
            remaining_rx,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let order_id = self.offer.order_id();
        let deadline = Instant::now() + self.settings.response_window;
        let countdown = tokio::time::sleep_until(deadline);
        tokio::pin!(countdown);

        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut inflight: Option<JoinHandle<Result<CallOutcome, AppError>>> = None;
        let mut commands_open = true;

        self.machine.offer();
        self.publish();
        info!(order_id = %order_id, window_secs = self.settings.response_window.as_secs(), "offer shown");

        while !self.machine.is_resolved() {
            let submit = tokio::select! {
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.on_command(command),
                    None => {
                        commands_open = false;
                        // Nobody is left to press retry.
                        self.machine.dismiss();
                        None
                    }
                },
                () = &mut countdown, if self.machine.is_offered() => {
                    info!(order_id = %order_id, "response window elapsed; auto-rejecting");
                    self.machine.trigger(OfferAction::Reject { auto: true })
                }
                _ = ticker.tick(), if self.machine.is_offered() => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    self.remaining_tx.send_replace(left.as_millis().div_ceil(1000) as u64);
                    None
                }
                Some(joined) = OptionFuture::from(inflight.as_mut()) => {
                    inflight = None;
                    let result = joined.unwrap_or_else(|err| {
                        Err(AppError::Internal(format!("offer call panicked: {err}")))
                    });
                    if let Err(err) = &result {
                        warn!(order_id = %order_id, error = %err, "offer resolution failed");
                    }
                    self.machine.respond(result);
                    None
                }
                else => {
                    self.machine.dismiss();
                    break;
                }
            };

            if let Some(action) = submit {
                if !self.machine.is_offered() {
                    self.remaining_tx.send_replace(0);
                }
                inflight = Some(self.submit(action));
            }
            self.publish();
        }

        self.publish();
        if let ControllerState::Resolved(resolution) = &self.machine.state {
            info!(order_id = %order_id, resolution = ?resolution, "offer resolved");
        }
    }

    fn on_command(&mut self, command: Command) -> Option<OfferAction> {
        let submit = match command {
            Command::Accept => self.machine.trigger(OfferAction::Accept),
            Command::Reject => self.machine.trigger(OfferAction::Reject { auto: false }),
            Command::Retry => self.machine.retry(),
            Command::Dismiss => {
                self.machine.dismiss();
                None
            }
            Command::Withdraw => {
                self.machine.withdraw();
                None
            }
        };

        if submit.is_none() && matches!(command, Command::Accept | Command::Reject | Command::Retry) {
            debug!(order_id = %self.offer.order_id(), command = ?command, "ignoring input");
        }
        submit
    }

    fn submit(&self, action: OfferAction) -> JoinHandle<Result<CallOutcome, AppError>> {
        tokio::spawn(call(self.client.clone(), self.offer.order_id(), action))
    }

    fn publish(&self) {
        self.state_tx.send_if_modified(|state| {
            if *state == self.machine.state {
                false
            } else {
                *state = self.machine.state.clone();
                true
            }
        });
    }
}
