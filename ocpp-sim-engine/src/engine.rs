//! Charge point engine
//!
//! Owns the connection supervisor and one session at a time. A session is:
//! - connect, BootNotification, a short grace period, initial StatusNotifications
//! - the receive loop plus the periodic heartbeat/status/meter tasks
//! - teardown: cancel tasks, close the socket, cancel pending requests
//!
//! Failed sessions are retried with exponential backoff until the attempt
//! budget runs out or shutdown is requested.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{watch, Notify, RwLock};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::config::EngineConfig;
use crate::correlation::CorrelationTable;
use crate::dispatch::{dispatch, Followup};
use crate::error::OcppError;
use crate::ocpp::*;
use crate::state::{ActiveTransaction, ChargePointState, RegistrationState, SessionEvent};
use crate::transport::{ConnectionState, FrameStream, Transport};

/// Session-scoped work, joined at teardown
type SessionTasks = JoinSet<Result<(), OcppError>>;

pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) transport: Transport,
    pub(crate) state: RwLock<ChargePointState>,
    pub(crate) pending: CorrelationTable,
    /// Wakes the heartbeat task when the interval is reconfigured
    pub(crate) interval_changed: Notify,
    background: parking_lot::Mutex<JoinSet<()>>,
}

/// Simulated charge point. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct Engine {
    pub(crate) shared: Arc<Shared>,
}

/// How a session ended
struct SessionReport {
    /// Boot, grace and initial status announcements all went through
    started: bool,
    error: Option<OcppError>,
}

/// Resolves once `rx` holds `true`. A dropped sender never resolves.
pub(crate) async fn wait_for_signal(rx: &mut watch::Receiver<bool>) {
    let sender_gone = rx.wait_for(|set| *set).await.is_err();
    if sender_gone {
        std::future::pending::<()>().await;
    }
}

/// Keep going on recoverable errors, bail out on transport failures
pub(crate) fn tolerate(what: &str, result: Result<(), OcppError>) -> Result<(), OcppError> {
    match result {
        Err(e) if e.is_transport_fatal() => Err(e),
        Err(OcppError::Cancelled) => Err(OcppError::Cancelled),
        Err(e) => {
            warn!("{} failed: {}", what, e);
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let transport = Transport::new(config.endpoint_url());
        let state = ChargePointState::new(&config);

        Self {
            shared: Arc::new(Shared {
                transport,
                state: RwLock::new(state),
                pending: CorrelationTable::new(),
                interval_changed: Notify::new(),
                background: parking_lot::Mutex::new(JoinSet::new()),
                config,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.transport.state()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.transport.is_usable()
    }

    pub async fn registration(&self) -> RegistrationState {
        self.shared.state.read().await.registration
    }

    /// Current heartbeat interval, as last set by boot or ChangeConfiguration
    pub async fn heartbeat_interval(&self) -> Duration {
        self.shared.state.read().await.heartbeat_interval()
    }

    pub async fn transaction(&self) -> Option<ActiveTransaction> {
        self.shared.state.read().await.transaction().cloned()
    }

    pub async fn connector_status(&self, connector_id: u32) -> Option<ChargePointStatus> {
        self.shared.state.read().await.connector_status(connector_id)
    }

    pub async fn meter_reading(&self) -> u64 {
        self.shared.state.read().await.meter_reading()
    }

    /// Requests still waiting for a reply
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// Send a CALL and wait for its CALLRESULT payload
    pub(crate) async fn call(&self, call: Call, timeout: Duration) -> Result<Value, OcppError> {
        let waiter = self.shared.pending.register(&call);
        let action = call.action.clone();

        if let Err(e) = self.shared.transport.send(&OcppMessage::Call(call)).await {
            self.shared.pending.remove(&waiter.message_id);
            return Err(e);
        }

        let outcome = waiter.wait(&self.shared.pending, timeout).await;
        if let Err(ref e) = outcome {
            debug!("{} did not complete: {}", action, e);
        }
        outcome
    }

    /// [`Engine::call`] with the default timeout, decoding the reply
    pub(crate) async fn request<T>(&self, call: Call) -> Result<T, OcppError>
    where
        T: serde::de::DeserializeOwned,
    {
        let payload = self
            .call(call, self.shared.config.timing.request_timeout)
            .await?;
        Ok(serde_json::from_value(payload)?)
    }

    /// Run until shutdown is signalled or reconnecting is given up.
    ///
    /// Returns `RetriesExhausted` when the attempt budget is spent.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), OcppError> {
        let timing = &self.shared.config.timing;
        let mut backoff = Backoff::new(
            timing.reconnect_delay,
            timing.max_reconnect_delay,
            timing.max_reconnect_attempts,
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            info!("Connecting to central system: {}", self.shared.transport.url());

            let connected = tokio::select! {
                res = self.shared.transport.connect() => Some(res),
                _ = wait_for_signal(&mut shutdown) => None,
            };

            match connected {
                None => break,
                Some(Ok(frames)) => {
                    let report = self.run_session(frames, &mut shutdown).await;
                    if report.started {
                        backoff.reset();
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                    match report.error {
                        Some(e) => warn!("Session ended: {}", e),
                        None => info!("Session ended"),
                    }
                }
                Some(Err(e)) => {
                    warn!("Connection attempt failed: {}", e);
                }
            }

            let Some(delay) = backoff.next_delay() else {
                let attempts = backoff.attempts();
                error!(attempts, "Giving up on central system after {} attempts", attempts);
                return Err(OcppError::RetriesExhausted { attempts });
            };

            info!(
                "Reconnecting in {:?} (attempt {}/{})",
                delay,
                backoff.attempts(),
                timing.max_reconnect_attempts
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_for_signal(&mut shutdown) => break,
            }
        }

        info!("Engine stopped");
        Ok(())
    }

    async fn run_session(
        &self,
        frames: FrameStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionReport {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.shared
            .state
            .write()
            .await
            .handle_event(SessionEvent::Connected);

        let mut tasks = SessionTasks::new();
        tasks.spawn(self.clone().receive_loop(frames, cancel_rx.clone()));

        let startup = tokio::select! {
            res = self.start_up(cancel_rx.clone()) => res,
            done = tasks.join_next() => Err(task_outcome("receive loop", done)),
            _ = wait_for_signal(shutdown) => Err(OcppError::Cancelled),
        };

        let (started, error) = match startup {
            Ok(()) => {
                tasks.spawn(self.clone().heartbeat_loop(cancel_rx.clone()));
                tasks.spawn(self.clone().status_loop(cancel_rx.clone()));
                tasks.spawn(self.clone().meter_loop(cancel_rx.clone()));
                info!("Session running");

                let error = tokio::select! {
                    done = tasks.join_next() => Some(task_outcome("session task", done)),
                    _ = wait_for_signal(shutdown) => None,
                };
                (true, error)
            }
            Err(OcppError::Cancelled) => (false, None),
            Err(e) => (false, Some(e)),
        };

        self.teardown(cancel_tx, tasks).await;
        SessionReport { started, error }
    }

    /// Everything that must happen before the periodic tasks start
    async fn start_up(&self, mut cancel: watch::Receiver<bool>) -> Result<(), OcppError> {
        tolerate("BootNotification", self.boot_notification().await)?;

        tokio::select! {
            _ = tokio::time::sleep(self.shared.config.timing.boot_grace) => {}
            _ = wait_for_signal(&mut cancel) => return Err(OcppError::Cancelled),
        }

        let statuses = {
            let mut state = self.shared.state.write().await;
            for connector_id in self.shared.config.connector_ids() {
                let busy = state
                    .transaction()
                    .is_some_and(|tx| tx.connector_id == connector_id);
                if !busy {
                    state.set_connector_status(connector_id, ChargePointStatus::Available);
                }
            }
            state.connector_statuses()
        };

        for (connector_id, status) in statuses {
            tolerate(
                "StatusNotification",
                self.status_notification(connector_id, status).await,
            )?;
        }

        Ok(())
    }

    async fn teardown(&self, cancel_tx: watch::Sender<bool>, mut tasks: SessionTasks) {
        let grace = self.shared.config.timing.shutdown_grace;
        let _ = cancel_tx.send(true);

        self.shared.transport.close().await;
        let cancelled = self.shared.pending.cancel_all();
        if cancelled > 0 {
            debug!("Cancelled {} pending requests", cancelled);
        }

        drain_session_tasks(&mut tasks, grace).await;

        let mut background = std::mem::take(&mut *self.shared.background.lock());
        drain_background(&mut background, grace).await;

        // Anything registered while the tasks were winding down
        self.shared.pending.cancel_all();

        self.shared
            .state
            .write()
            .await
            .handle_event(SessionEvent::Disconnected);
    }

    /// Run `work` as an independent unit tied to the current session.
    ///
    /// Failures are logged here; panics surface when the set is drained.
    pub(crate) fn spawn_background<F>(
        &self,
        name: &'static str,
        cancel: &watch::Receiver<bool>,
        work: F,
    ) where
        F: Future<Output = Result<(), OcppError>> + Send + 'static,
    {
        if *cancel.borrow() {
            debug!("Session is over, not starting {}", name);
            return;
        }

        let mut background = self.shared.background.lock();
        while let Some(done) = background.try_join_next() {
            log_background(done);
        }

        background.spawn(async move {
            match work.await {
                Ok(()) => debug!("{} finished", name),
                Err(OcppError::Cancelled) => debug!("{} cancelled", name),
                Err(e) => warn!("{} failed: {}", name, e),
            }
        });
    }

    async fn receive_loop(
        self,
        mut frames: FrameStream,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<(), OcppError> {
        loop {
            let text = tokio::select! {
                frame = frames.next_text() => match frame? {
                    Some(text) => text,
                    None => return Err(OcppError::ConnectionClosed),
                },
                _ = wait_for_signal(&mut cancel) => return Ok(()),
            };

            match OcppMessage::decode(&text) {
                Inbound::Ignored(reason) => {
                    warn!("Ignoring frame ({}): {}", reason, text);
                }
                Inbound::Message(OcppMessage::CallResult(result)) => {
                    if !self.shared.pending.resolve(&result.message_id, result.payload) {
                        debug!("No pending request for {}, reply dropped", result.message_id);
                    }
                }
                Inbound::Message(OcppMessage::CallError(err)) => {
                    warn!(
                        "CALLERROR for {}: {} - {}",
                        err.message_id, err.error_code, err.error_description
                    );
                    if !self.shared.pending.reject(
                        &err.message_id,
                        err.error_code,
                        err.error_description,
                        err.error_details,
                    ) {
                        debug!("No pending request for {}, error dropped", err.message_id);
                    }
                }
                Inbound::Message(OcppMessage::Call(call)) => {
                    let engine = self.clone();
                    let session = cancel.clone();
                    self.spawn_background("inbound request", &cancel, async move {
                        engine.handle_call(call, session).await
                    });
                }
            }
        }
    }

    /// Answer one central-system request, then start its follow-up
    async fn handle_call(
        &self,
        call: Call,
        cancel: watch::Receiver<bool>,
    ) -> Result<(), OcppError> {
        info!("{} from central system ({})", call.action, call.message_id);

        let dispatched = {
            let mut state = self.shared.state.write().await;
            dispatch(&call, &mut state)
        };

        if call.action == Action::ChangeConfiguration {
            self.shared.interval_changed.notify_waiters();
        }

        if let Err(e) = self.shared.transport.send(&dispatched.reply).await {
            let mut state = self.shared.state.write().await;
            match &dispatched.followup {
                Some(Followup::Start { connector_id, .. }) => state.abort_start(*connector_id),
                Some(Followup::Stop(claim)) => state.abort_stop(claim.transaction_id),
                None => {}
            }
            return Err(e);
        }

        match dispatched.followup {
            Some(Followup::Start {
                id_tag,
                connector_id,
            }) => {
                let engine = self.clone();
                self.spawn_background("remote start", &cancel, async move {
                    engine.start_sequence(id_tag, connector_id).await
                });
            }
            Some(Followup::Stop(claim)) => {
                let engine = self.clone();
                let session = cancel.clone();
                self.spawn_background("remote stop", &cancel, async move {
                    engine
                        .stop_sequence(claim, StopReason::Remote, session)
                        .await
                });
            }
            None => {}
        }

        Ok(())
    }

    /// Send BootNotification and apply the registration outcome
    pub(crate) async fn boot_notification(&self) -> Result<(), OcppError> {
        let call = Call::boot_notification(self.shared.config.boot_notification())?;
        let response: BootNotificationResponse = self.request(call).await?;

        let event = match response.status {
            RegistrationStatus::Accepted => SessionEvent::BootAccepted {
                interval: response.interval,
            },
            RegistrationStatus::Pending => SessionEvent::BootPending {
                interval: response.interval,
            },
            RegistrationStatus::Rejected => SessionEvent::BootRejected,
        };
        self.shared.state.write().await.handle_event(event);
        Ok(())
    }

    pub(crate) async fn heartbeat(&self) -> Result<(), OcppError> {
        let response: HeartbeatResponse = self.request(Call::heartbeat()?).await?;
        debug!("Heartbeat acknowledged, server time {}", response.current_time);
        Ok(())
    }

    pub(crate) async fn status_notification(
        &self,
        connector_id: u32,
        status: ChargePointStatus,
    ) -> Result<(), OcppError> {
        let call = Call::status_notification(connector_id, status)?;
        self.call(call, self.shared.config.timing.request_timeout)
            .await
            .map(|_| ())
    }

    /// Record a connector status and announce it. Best effort.
    pub(crate) async fn update_status(&self, connector_id: u32, status: ChargePointStatus) {
        let known = self
            .shared
            .state
            .write()
            .await
            .set_connector_status(connector_id, status);
        if !known {
            warn!("No connector {}, status {} not recorded", connector_id, status);
            return;
        }

        if let Err(e) = self.status_notification(connector_id, status).await {
            debug!("Status {} for connector {} not delivered: {}", status, connector_id, e);
        }
    }
}

fn task_outcome(
    name: &str,
    done: Option<Result<Result<(), OcppError>, JoinError>>,
) -> OcppError {
    match done {
        Some(Ok(Ok(()))) => {
            debug!("{} exited", name);
            OcppError::ConnectionClosed
        }
        Some(Ok(Err(e))) => e,
        Some(Err(e)) => {
            error!("{} panicked: {}", name, e);
            OcppError::ConnectionClosed
        }
        None => OcppError::ConnectionClosed,
    }
}

async fn drain_session_tasks(tasks: &mut SessionTasks, grace: Duration) {
    let drained = tokio::time::timeout(grace, async {
        while let Some(done) = tasks.join_next().await {
            match done {
                Ok(Err(e)) if !matches!(e, OcppError::Cancelled) => {
                    debug!("Session task ended with: {}", e)
                }
                Err(e) if e.is_panic() => error!("Session task panicked: {}", e),
                _ => {}
            }
        }
    })
    .await;

    if drained.is_err() {
        warn!("Session tasks still running after {:?}, aborting", grace);
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
    }
}

async fn drain_background(background: &mut JoinSet<()>, grace: Duration) {
    let drained = tokio::time::timeout(grace, async {
        while let Some(done) = background.join_next().await {
            log_background(done);
        }
    })
    .await;

    if drained.is_err() {
        warn!("Background tasks still running after {:?}, aborting", grace);
        background.abort_all();
        while background.join_next().await.is_some() {}
    }
}

fn log_background(done: Result<(), JoinError>) {
    if let Err(e) = done {
        if e.is_panic() {
            error!("Background task panicked: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::new(EngineConfig::new("ws://127.0.0.1:1/ocpp", "CP-TEST"))
    }

    #[test]
    fn test_tolerate_splits_errors() {
        assert!(tolerate("x", Ok(())).is_ok());
        assert!(tolerate("x", Err(OcppError::Timeout)).is_ok());
        assert!(tolerate("x", Err(OcppError::InvalidFormat)).is_ok());
        assert!(matches!(
            tolerate("x", Err(OcppError::NotConnected)),
            Err(OcppError::NotConnected)
        ));
        assert!(matches!(
            tolerate("x", Err(OcppError::Cancelled)),
            Err(OcppError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_call_without_connection_leaves_no_entry() {
        let engine = engine();
        let result = engine
            .call(Call::heartbeat().unwrap(), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(OcppError::NotConnected)));
        assert_eq!(engine.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_initial_state() {
        let engine = engine();
        assert_eq!(engine.connection_state(), ConnectionState::Disconnected);
        assert_eq!(engine.registration().await, RegistrationState::Disconnected);
        assert_eq!(engine.heartbeat_interval().await, Duration::from_secs(60));
        assert!(engine.transaction().await.is_none());
        assert_eq!(
            engine.connector_status(1).await,
            Some(ChargePointStatus::Available)
        );
    }

    #[tokio::test]
    async fn test_run_gives_up_after_budget() {
        let mut config = EngineConfig::new("ws://127.0.0.1:1/ocpp", "CP-TEST");
        config.timing.reconnect_delay = Duration::from_millis(10);
        config.timing.max_reconnect_delay = Duration::from_millis(20);
        config.timing.max_reconnect_attempts = 2;

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let result = Engine::new(config).run(shutdown_rx).await;
        assert!(matches!(
            result,
            Err(OcppError::RetriesExhausted { attempts: 3 })
        ));
    }

    #[tokio::test]
    async fn test_run_returns_on_shutdown() {
        let mut config = EngineConfig::new("ws://127.0.0.1:1/ocpp", "CP-TEST");
        config.timing.reconnect_delay = Duration::from_secs(3600);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine = Engine::new(config);
        let handle = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run(shutdown_rx).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_spawn_background_skips_finished_session() {
        let engine = engine();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        cancel_tx.send(true).unwrap();

        engine.spawn_background("noop", &cancel_rx, async { Ok(()) });
        assert!(engine.shared.background.lock().is_empty());
    }
}
