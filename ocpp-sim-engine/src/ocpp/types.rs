//! OCPP 1.6J message types
//!
//! Payloads for the messages a simulated charge point exchanges:
//! - BootNotification / Heartbeat / StatusNotification / MeterValues
//! - Authorize / StartTransaction / StopTransaction
//! - RemoteStartTransaction / RemoteStopTransaction
//! - Reset / GetConfiguration / ChangeConfiguration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Enumerations
// ============================================================================

/// Connector status as reported in StatusNotification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargePointStatus {
    Available,
    Preparing,
    Charging,
    SuspendedEVSE,
    SuspendedEV,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
}

impl std::fmt::Display for ChargePointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::str::FromStr for ChargePointStatus {
    type Err = crate::error::OcppError;

    /// Case-insensitive, so console input like `charging` works
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s.to_ascii_lowercase().as_str() {
            "available" => ChargePointStatus::Available,
            "preparing" => ChargePointStatus::Preparing,
            "charging" => ChargePointStatus::Charging,
            "suspendedevse" => ChargePointStatus::SuspendedEVSE,
            "suspendedev" => ChargePointStatus::SuspendedEV,
            "finishing" => ChargePointStatus::Finishing,
            "reserved" => ChargePointStatus::Reserved,
            "unavailable" => ChargePointStatus::Unavailable,
            "faulted" => ChargePointStatus::Faulted,
            _ => return Err(crate::error::OcppError::UnknownStatus(s.to_string())),
        };
        Ok(status)
    }
}

/// Error code carried in StatusNotification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargePointErrorCode {
    NoError,
    OtherError,
}

/// Generic OCPP status for command responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenericStatus {
    Accepted,
    Rejected,
}

/// Registration status for BootNotification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStatus {
    Accepted,
    Pending,
    Rejected,
}

/// Authorization status inside `idTagInfo`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationStatus {
    Accepted,
    Blocked,
    Expired,
    Invalid,
    ConcurrentTx,
}

/// ChangeConfiguration outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigurationStatus {
    Accepted,
    Rejected,
    RebootRequired,
    NotSupported,
}

/// Reset kind requested by the central system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetType {
    Hard,
    Soft,
}

/// Why a transaction ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    EmergencyStop,
    EVDisconnected,
    HardReset,
    Local,
    Other,
    PowerLoss,
    Reboot,
    Remote,
    SoftReset,
    UnlockCommand,
    DeAuthorized,
}

/// Measurand types for meter values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Measurand {
    #[serde(rename = "Energy.Active.Import.Register")]
    EnergyActiveImportRegister,
    #[serde(rename = "Power.Active.Import")]
    PowerActiveImport,
}

/// Reading context for meter values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadingContext {
    #[serde(rename = "Sample.Periodic")]
    SamplePeriodic,
    #[serde(rename = "Transaction.Begin")]
    TransactionBegin,
    #[serde(rename = "Transaction.End")]
    TransactionEnd,
}

/// Unit of measure for sampled values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitOfMeasure {
    Wh,
    W,
}

// ============================================================================
// Complex Types
// ============================================================================

/// Authorization verdict attached to Authorize / StartTransaction replies
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdTagInfo {
    pub status: AuthorizationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id_tag: Option<String>,
}

/// Sampled value for meter readings. OCPP 1.6 carries the value as a string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampledValue {
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ReadingContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurand: Option<Measurand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<UnitOfMeasure>,
}

/// Meter value with timestamp and samples
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValue {
    pub timestamp: DateTime<Utc>,
    pub sampled_value: Vec<SampledValue>,
}

impl MeterValue {
    /// Single energy register sample in Wh
    pub fn energy_register(wh: u64, context: ReadingContext) -> Self {
        Self {
            timestamp: Utc::now(),
            sampled_value: vec![SampledValue {
                value: wh.to_string(),
                context: Some(context),
                measurand: Some(Measurand::EnergyActiveImportRegister),
                unit: Some(UnitOfMeasure::Wh),
            }],
        }
    }
}

/// One entry of a GetConfiguration reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyValue {
    pub key: String,
    pub readonly: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

// ============================================================================
// Charge point → central system requests
// ============================================================================

/// BootNotification request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationRequest {
    pub charge_point_vendor: String,
    pub charge_point_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_point_serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
}

/// Heartbeat request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {}

/// StatusNotification request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotificationRequest {
    pub connector_id: u32,
    pub error_code: ChargePointErrorCode,
    pub status: ChargePointStatus,
    pub timestamp: DateTime<Utc>,
}

/// MeterValues request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValuesRequest {
    pub connector_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<i32>,
    pub meter_value: Vec<MeterValue>,
}

/// Authorize request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    pub id_tag: String,
}

/// StartTransaction request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTransactionRequest {
    pub connector_id: u32,
    pub id_tag: String,
    pub meter_start: u64,
    pub timestamp: DateTime<Utc>,
}

/// StopTransaction request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTransactionRequest {
    pub transaction_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_tag: Option<String>,
    pub meter_stop: u64,
    pub timestamp: DateTime<Utc>,
    pub reason: StopReason,
}

// ============================================================================
// Central system → charge point requests
// ============================================================================

/// RemoteStartTransaction request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStartTransactionRequest {
    #[serde(default)]
    pub id_tag: Option<String>,
    #[serde(default)]
    pub connector_id: Option<u32>,
}

/// RemoteStopTransaction request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStopTransactionRequest {
    pub transaction_id: i32,
}

/// Reset request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetRequest {
    #[serde(rename = "type")]
    pub reset_type: ResetType,
}

/// GetConfiguration request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetConfigurationRequest {
    #[serde(default)]
    pub key: Option<Vec<String>>,
}

/// ChangeConfiguration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeConfigurationRequest {
    pub key: String,
    pub value: String,
}

// ============================================================================
// Responses
// ============================================================================

/// BootNotification response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationResponse {
    pub current_time: DateTime<Utc>,
    pub interval: i64,
    pub status: RegistrationStatus,
}

/// Heartbeat response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub current_time: DateTime<Utc>,
}

/// Authorize response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeResponse {
    pub id_tag_info: IdTagInfo,
}

/// StartTransaction response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTransactionResponse {
    pub transaction_id: i32,
    pub id_tag_info: IdTagInfo,
}

/// Status-only reply used by RemoteStart/RemoteStop/Reset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse<S> {
    pub status: S,
}

/// GetConfiguration response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetConfigurationResponse {
    pub configuration_key: Vec<KeyValue>,
    pub unknown_key: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_notification_request() {
        let req = BootNotificationRequest {
            charge_point_vendor: "Elektrokombinacija".to_string(),
            charge_point_model: "EK3".to_string(),
            charge_point_serial_number: Some("EK3-001".to_string()),
            firmware_version: None,
        };

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["chargePointVendor"], "Elektrokombinacija");
        assert_eq!(json["chargePointSerialNumber"], "EK3-001");
        assert!(json.get("firmwareVersion").is_none());
    }

    #[test]
    fn test_remote_start_without_token() {
        let req: RemoteStartTransactionRequest =
            serde_json::from_str(r#"{"connectorId": 1}"#).unwrap();
        assert!(req.id_tag.is_none());
        assert_eq!(req.connector_id, Some(1));
    }

    #[test]
    fn test_meter_value_wire_shape() {
        let mv = MeterValue::energy_register(1250, ReadingContext::SamplePeriodic);
        let json = serde_json::to_value(&mv).unwrap();
        let sample = &json["sampledValue"][0];
        assert_eq!(sample["value"], "1250");
        assert_eq!(sample["measurand"], "Energy.Active.Import.Register");
        assert_eq!(sample["context"], "Sample.Periodic");
        assert_eq!(sample["unit"], "Wh");
    }

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!(
            "charging".parse::<ChargePointStatus>().unwrap(),
            ChargePointStatus::Charging
        );
        assert_eq!(
            "SuspendedEVSE".parse::<ChargePointStatus>().unwrap(),
            ChargePointStatus::SuspendedEVSE
        );
        assert!("plugged".parse::<ChargePointStatus>().is_err());
    }
}
