//! Configuration for the charge point simulator
//!
//! A plain record handed to the engine by whoever loads it (the node binary
//! maps CLI flags onto it). Only the heartbeat interval changes at runtime,
//! and that lives in the engine state, not here.

use std::time::Duration;

use crate::ocpp::BootNotificationRequest;

/// WebSocket subprotocol token for OCPP 1.6J
pub const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

/// Immutable identity reported in BootNotification
#[derive(Debug, Clone)]
pub struct EndpointIdentity {
    /// Charge point identity (appended to the URL path)
    pub charge_point_id: String,
    pub vendor: String,
    pub model: String,
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
}

/// Session settings; the heartbeat interval is only the starting value
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Heartbeat interval in seconds, until the central system says otherwise
    pub heartbeat_interval: u64,
    /// Token used by console operations called without one
    pub default_id_tag: String,
}

/// Timers, timeouts and the reconnect policy
#[derive(Debug, Clone)]
pub struct Timing {
    /// Default wait for a CALLRESULT/CALLERROR
    pub request_timeout: Duration,
    /// Authorize replies can be slow; kept separate from `request_timeout`
    pub authorize_timeout: Duration,
    /// Pause after BootNotification before other traffic
    pub boot_grace: Duration,
    pub status_interval: Duration,
    pub meter_interval: Duration,
    /// Simulated delay between accepting RemoteStop and sending StopTransaction
    pub stop_delay: Duration,
    /// Initial reconnect delay
    pub reconnect_delay: Duration,
    /// Maximum reconnect delay (exponential backoff cap)
    pub max_reconnect_delay: Duration,
    /// Consecutive failed attempts tolerated before giving up
    pub max_reconnect_attempts: u32,
    /// How long session teardown waits for tasks before aborting them
    pub shutdown_grace: Duration,
}

/// Complete engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Central system WebSocket URL (without charge point id)
    pub server_url: String,
    pub identity: EndpointIdentity,
    pub session: SessionConfig,
    /// Physical connectors, numbered from 1. Connector 0 is the device itself.
    pub connector_count: u32,
    pub timing: Timing,
}

impl Default for EndpointIdentity {
    fn default() -> Self {
        Self {
            charge_point_id: "EK3-001".to_string(),
            vendor: "Elektrokombinacija".to_string(),
            model: "EK3-OCPP".to_string(),
            serial_number: None,
            firmware_version: Some("0.1.0".to_string()),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: 60,
            default_id_tag: "SIM-TAG-001".to_string(),
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            authorize_timeout: Duration::from_secs(60),
            boot_grace: Duration::from_secs(1),
            status_interval: Duration::from_secs(60),
            meter_interval: Duration::from_secs(30),
            stop_delay: Duration::from_secs(2),
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_delay: Duration::from_secs(300),
            max_reconnect_attempts: 10,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:8180/steve/websocket/CentralSystemService".to_string(),
            identity: EndpointIdentity::default(),
            session: SessionConfig::default(),
            connector_count: 1,
            timing: Timing::default(),
        }
    }
}

impl EngineConfig {
    /// Create config with basic parameters
    pub fn new(server_url: impl Into<String>, charge_point_id: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            identity: EndpointIdentity {
                charge_point_id: charge_point_id.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Set vendor info
    pub fn with_vendor(mut self, vendor: impl Into<String>, model: impl Into<String>) -> Self {
        self.identity.vendor = vendor.into();
        self.identity.model = model.into();
        self
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.identity.serial_number = Some(serial.into());
        self
    }

    pub fn with_firmware(mut self, version: impl Into<String>) -> Self {
        self.identity.firmware_version = Some(version.into());
        self
    }

    pub fn with_connector_count(mut self, count: u32) -> Self {
        self.connector_count = count;
        self
    }

    pub fn with_heartbeat_interval(mut self, secs: u64) -> Self {
        self.session.heartbeat_interval = secs;
        self
    }

    pub fn with_id_tag(mut self, id_tag: impl Into<String>) -> Self {
        self.session.default_id_tag = id_tag.into();
        self
    }

    pub fn with_authorize_timeout(mut self, timeout: Duration) -> Self {
        self.timing.authorize_timeout = timeout;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.timing.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Full WebSocket URL: server URL plus the charge point id as last path segment
    pub fn endpoint_url(&self) -> String {
        format!(
            "{}/{}",
            self.server_url.trim_end_matches('/'),
            self.identity.charge_point_id
        )
    }

    /// Connector ids announced after boot, in ascending order
    pub fn connector_ids(&self) -> impl Iterator<Item = u32> {
        0..=self.connector_count
    }

    pub fn boot_notification(&self) -> BootNotificationRequest {
        BootNotificationRequest {
            charge_point_vendor: self.identity.vendor.clone(),
            charge_point_model: self.identity.model.clone(),
            charge_point_serial_number: self.identity.serial_number.clone(),
            firmware_version: self.identity.firmware_version.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new("ws://localhost:9000/ocpp", "CS001")
            .with_vendor("EK", "EK3")
            .with_serial("SN001")
            .with_connector_count(2)
            .with_heartbeat_interval(30);

        assert_eq!(config.identity.charge_point_id, "CS001");
        assert_eq!(config.identity.vendor, "EK");
        assert_eq!(config.connector_count, 2);
        assert_eq!(config.session.heartbeat_interval, 30);
        assert_eq!(config.connector_ids().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_endpoint_url() {
        let config = EngineConfig::new("ws://localhost:9000/ocpp", "EK3-001");
        assert_eq!(config.endpoint_url(), "ws://localhost:9000/ocpp/EK3-001");

        let config = EngineConfig::new("ws://localhost:9000/ocpp/", "EK3-001");
        assert_eq!(config.endpoint_url(), "ws://localhost:9000/ocpp/EK3-001");
    }

    #[test]
    fn test_boot_notification_from_identity() {
        let config = EngineConfig::new("ws://x", "CS1").with_firmware("2.0.0");
        let boot = config.boot_notification();
        assert_eq!(boot.charge_point_vendor, "Elektrokombinacija");
        assert_eq!(boot.firmware_version.as_deref(), Some("2.0.0"));
        assert!(boot.charge_point_serial_number.is_none());
    }
}
