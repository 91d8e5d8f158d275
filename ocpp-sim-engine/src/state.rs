//! Charge point session state
//!
//! The single mutable record shared by the receive loop, the periodic tasks
//! and the transaction sequences:
//! - registration lifecycle (BootNotification outcome)
//! - live heartbeat interval
//! - connector statuses
//! - the cumulative energy register and the (at most one) active transaction
//!
//! Callers hold it behind one lock and never across an await.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::OcppError;
use crate::ocpp::{ChargePointStatus, KeyValue};

/// Energy added to the register per meter sample, in Wh
const METER_STEP_WH: RangeInclusive<u64> = 10..=120;

/// Where the initial register value is drawn from, in Wh
const METER_INITIAL_WH: RangeInclusive<u64> = 1_000..=50_000;

/// Longest heartbeat interval this device accepts, in seconds (one day)
pub const MAX_HEARTBEAT_INTERVAL_SECS: u64 = 86_400;

pub const KEY_HEARTBEAT_INTERVAL: &str = "HeartbeatInterval";
pub const KEY_METER_VALUE_SAMPLE_INTERVAL: &str = "MeterValueSampleInterval";
pub const KEY_NUMBER_OF_CONNECTORS: &str = "NumberOfConnectors";

/// Registration state in the connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// Waiting to connect
    Disconnected,
    /// Connected, BootNotification not answered yet
    Connected,
    /// Central system answered Pending
    Pending,
    /// Registered with the central system
    Registered,
    /// Registration rejected
    Rejected,
}

/// Events that move the registration state
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    BootAccepted { interval: i64 },
    BootPending { interval: i64 },
    BootRejected,
}

/// Active transaction record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTransaction {
    pub transaction_id: i32,
    pub connector_id: u32,
    pub id_tag: String,
    pub meter_start: u64,
    pub started_at: DateTime<Utc>,
    /// A StopTransaction is in flight
    pub stopping: bool,
}

/// What a stop sequence needs, captured when the stop is claimed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopClaim {
    pub transaction_id: i32,
    pub connector_id: u32,
    pub id_tag: String,
}

/// One meter sample, only produced while a transaction is active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeterSample {
    pub connector_id: u32,
    pub transaction_id: i32,
    pub meter_wh: u64,
}

/// Main session record
#[derive(Debug)]
pub struct ChargePointState {
    pub registration: RegistrationState,
    pub registered_at: Option<DateTime<Utc>>,
    heartbeat_interval: u64,
    meter_sample_interval: u64,
    meter_wh: u64,
    connectors: BTreeMap<u32, ChargePointStatus>,
    transaction: Option<ActiveTransaction>,
    /// Connectors with an authorize/start sequence in flight
    starting: BTreeSet<u32>,
}

impl ChargePointState {
    pub fn new(config: &EngineConfig) -> Self {
        let connectors = config
            .connector_ids()
            .map(|id| (id, ChargePointStatus::Available))
            .collect();

        Self {
            registration: RegistrationState::Disconnected,
            registered_at: None,
            heartbeat_interval: config.session.heartbeat_interval,
            meter_sample_interval: config.timing.meter_interval.as_secs(),
            meter_wh: rand::thread_rng().gen_range(METER_INITIAL_WH),
            connectors,
            transaction: None,
            starting: BTreeSet::new(),
        }
    }

    /// Handle a session event
    pub fn handle_event(&mut self, event: SessionEvent) {
        debug!("Session event: {:?}", event);

        match event {
            SessionEvent::Connected => {
                self.registration = RegistrationState::Connected;
            }

            SessionEvent::Disconnected => {
                self.registration = RegistrationState::Disconnected;
                self.registered_at = None;
                self.starting.clear();
                if let Some(tx) = self.transaction.as_mut() {
                    tx.stopping = false;
                }
            }

            SessionEvent::BootAccepted { interval } => {
                self.registration = RegistrationState::Registered;
                self.registered_at = Some(Utc::now());
                self.apply_boot_interval(interval);
                info!("Registered, heartbeat interval: {}s", self.heartbeat_interval);
            }

            SessionEvent::BootPending { interval } => {
                self.registration = RegistrationState::Pending;
                self.apply_boot_interval(interval);
                info!("Registration pending, interval: {}s", self.heartbeat_interval);
            }

            SessionEvent::BootRejected => {
                self.registration = RegistrationState::Rejected;
                warn!("BootNotification rejected by central system");
            }
        }
    }

    fn apply_boot_interval(&mut self, interval: i64) {
        match u64::try_from(interval) {
            Ok(secs) if secs > MAX_HEARTBEAT_INTERVAL_SECS => {
                warn!(
                    "Boot interval {}s too long, using {}s",
                    secs, MAX_HEARTBEAT_INTERVAL_SECS
                );
                self.heartbeat_interval = MAX_HEARTBEAT_INTERVAL_SECS;
            }
            Ok(secs) if secs > 0 => self.heartbeat_interval = secs,
            _ => debug!("Keeping heartbeat interval, server sent {}", interval),
        }
    }

    /// Whether `secs` may become the heartbeat interval
    pub fn is_valid_heartbeat_interval(secs: u64) -> bool {
        (1..=MAX_HEARTBEAT_INTERVAL_SECS).contains(&secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }

    pub fn set_heartbeat_interval(&mut self, secs: u64) {
        info!("Heartbeat interval {}s -> {}s", self.heartbeat_interval, secs);
        self.heartbeat_interval = secs;
    }

    pub fn meter_reading(&self) -> u64 {
        self.meter_wh
    }

    pub fn has_connector(&self, connector_id: u32) -> bool {
        connector_id != 0 && self.connectors.contains_key(&connector_id)
    }

    pub fn connector_status(&self, connector_id: u32) -> Option<ChargePointStatus> {
        self.connectors.get(&connector_id).copied()
    }

    /// Returns false for connectors this device doesn't have
    pub fn set_connector_status(&mut self, connector_id: u32, status: ChargePointStatus) -> bool {
        match self.connectors.get_mut(&connector_id) {
            Some(current) => {
                *current = status;
                true
            }
            None => false,
        }
    }

    /// All connectors in ascending order, device (0) first
    pub fn connector_statuses(&self) -> Vec<(u32, ChargePointStatus)> {
        self.connectors.iter().map(|(id, s)| (*id, *s)).collect()
    }

    pub fn transaction(&self) -> Option<&ActiveTransaction> {
        self.transaction.as_ref()
    }

    /// Whether a start sequence could begin on `connector_id` right now
    pub fn can_start(&self, connector_id: u32) -> bool {
        self.has_connector(connector_id)
            && self.transaction.is_none()
            && !self.starting.contains(&connector_id)
    }

    /// Claim `connector_id` for an authorize/start sequence
    pub fn begin_start(&mut self, connector_id: u32) -> Result<(), OcppError> {
        if !self.can_start(connector_id) {
            return Err(OcppError::TransactionActive(connector_id));
        }
        self.starting.insert(connector_id);
        Ok(())
    }

    /// Release the claim after a failed start sequence
    pub fn abort_start(&mut self, connector_id: u32) {
        self.starting.remove(&connector_id);
    }

    /// Record the transaction id returned by StartTransaction
    pub fn record_start(
        &mut self,
        connector_id: u32,
        transaction_id: i32,
        id_tag: &str,
        meter_start: u64,
    ) {
        self.starting.remove(&connector_id);
        self.transaction = Some(ActiveTransaction {
            transaction_id,
            connector_id,
            id_tag: id_tag.to_string(),
            meter_start,
            started_at: Utc::now(),
            stopping: false,
        });
        info!(
            "Transaction {} started on connector {} (meter {} Wh)",
            transaction_id, connector_id, meter_start
        );
    }

    /// True if `transaction_id` is the active transaction and no stop is in flight
    pub fn is_stoppable(&self, transaction_id: i32) -> bool {
        matches!(
            &self.transaction,
            Some(tx) if tx.transaction_id == transaction_id && !tx.stopping
        )
    }

    /// Mark the active transaction as stopping
    pub fn begin_stop(&mut self, transaction_id: i32) -> Option<StopClaim> {
        if !self.is_stoppable(transaction_id) {
            return None;
        }
        let tx = self.transaction.as_mut()?;
        tx.stopping = true;
        Some(StopClaim {
            transaction_id: tx.transaction_id,
            connector_id: tx.connector_id,
            id_tag: tx.id_tag.clone(),
        })
    }

    /// StopTransaction failed to go out; the record stays active
    pub fn abort_stop(&mut self, transaction_id: i32) {
        if let Some(tx) = self.transaction.as_mut() {
            if tx.transaction_id == transaction_id {
                tx.stopping = false;
            }
        }
    }

    /// Clear the record once StopTransaction was delivered
    pub fn complete_stop(&mut self, transaction_id: i32) -> Option<ActiveTransaction> {
        if self.transaction.as_ref().map(|tx| tx.transaction_id) != Some(transaction_id) {
            return None;
        }
        let tx = self.transaction.take()?;
        info!(
            "Transaction {} stopped on connector {}, energy: {} Wh",
            tx.transaction_id,
            tx.connector_id,
            self.meter_wh.saturating_sub(tx.meter_start)
        );
        Some(tx)
    }

    /// Advance the register by a simulated consumption step
    pub fn advance_meter(&mut self) -> u64 {
        self.meter_wh += rand::thread_rng().gen_range(METER_STEP_WH);
        self.meter_wh
    }

    /// Advance the register and describe it, if a transaction is active
    pub fn meter_sample(&mut self) -> Option<MeterSample> {
        let (connector_id, transaction_id) = {
            let tx = self.transaction.as_ref()?;
            (tx.connector_id, tx.transaction_id)
        };
        let meter_wh = self.advance_meter();
        Some(MeterSample {
            connector_id,
            transaction_id,
            meter_wh,
        })
    }

    /// Every configuration key this device knows, in reply order
    pub fn configuration(&self) -> Vec<KeyValue> {
        vec![
            KeyValue {
                key: KEY_HEARTBEAT_INTERVAL.to_string(),
                readonly: false,
                value: Some(self.heartbeat_interval.to_string()),
            },
            KeyValue {
                key: KEY_METER_VALUE_SAMPLE_INTERVAL.to_string(),
                readonly: true,
                value: Some(self.meter_sample_interval.to_string()),
            },
            KeyValue {
                key: KEY_NUMBER_OF_CONNECTORS.to_string(),
                readonly: true,
                value: Some(self.connectors.len().saturating_sub(1).to_string()),
            },
        ]
    }
}
