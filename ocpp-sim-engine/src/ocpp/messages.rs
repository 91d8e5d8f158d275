//! OCPP-J message framing
//!
//! Every frame is a JSON array:
//! - CALL: [2, messageId, action, payload]
//! - CALLRESULT: [3, messageId, payload]
//! - CALLERROR: [4, messageId, errorCode, errorDescription, errorDetails]
//!
//! Decoding is permissive: frames that are not arrays of at least three
//! elements, or carry an unknown type tag, come back as [`Inbound::Ignored`]
//! instead of an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::types::*;
use crate::error::OcppError;

/// OCPP message type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

/// OCPP 1.6 RPC error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    NotImplemented,
    NotSupported,
    InternalError,
    ProtocolError,
    SecurityError,
    FormationViolation,
    PropertyConstraintViolation,
    OccurenceConstraintViolation,
    TypeConstraintViolation,
    GenericError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl ErrorCode {
    /// Unrecognised codes degrade to `GenericError`
    pub fn from_wire(s: &str) -> Self {
        serde_json::from_value(Value::String(s.to_string())).unwrap_or(ErrorCode::GenericError)
    }
}

/// OCPP action names
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    // CP -> CS
    BootNotification,
    Heartbeat,
    StatusNotification,
    MeterValues,
    Authorize,
    StartTransaction,
    StopTransaction,

    // CS -> CP
    RemoteStartTransaction,
    RemoteStopTransaction,
    Reset,
    GetConfiguration,
    ChangeConfiguration,

    /// Anything else; kept verbatim so it can be answered with NotSupported
    Other(String),
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::BootNotification => "BootNotification",
            Action::Heartbeat => "Heartbeat",
            Action::StatusNotification => "StatusNotification",
            Action::MeterValues => "MeterValues",
            Action::Authorize => "Authorize",
            Action::StartTransaction => "StartTransaction",
            Action::StopTransaction => "StopTransaction",
            Action::RemoteStartTransaction => "RemoteStartTransaction",
            Action::RemoteStopTransaction => "RemoteStopTransaction",
            Action::Reset => "Reset",
            Action::GetConfiguration => "GetConfiguration",
            Action::ChangeConfiguration => "ChangeConfiguration",
            Action::Other(name) => name,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Action {
    fn from(s: &str) -> Self {
        match s {
            "BootNotification" => Action::BootNotification,
            "Heartbeat" => Action::Heartbeat,
            "StatusNotification" => Action::StatusNotification,
            "MeterValues" => Action::MeterValues,
            "Authorize" => Action::Authorize,
            "StartTransaction" => Action::StartTransaction,
            "StopTransaction" => Action::StopTransaction,
            "RemoteStartTransaction" => Action::RemoteStartTransaction,
            "RemoteStopTransaction" => Action::RemoteStopTransaction,
            "Reset" => Action::Reset,
            "GetConfiguration" => Action::GetConfiguration,
            "ChangeConfiguration" => Action::ChangeConfiguration,
            other => Action::Other(other.to_string()),
        }
    }
}

/// Time-ordered unique message id
pub fn new_message_id() -> String {
    Uuid::now_v7().to_string()
}

/// OCPP CALL message (request)
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub message_id: String,
    pub action: Action,
    pub payload: Value,
}

impl Call {
    /// Create a new CALL message with auto-generated ID
    pub fn new(action: Action, payload: impl Serialize) -> Result<Self, OcppError> {
        Ok(Self {
            message_id: new_message_id(),
            action,
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn boot_notification(request: BootNotificationRequest) -> Result<Self, OcppError> {
        Self::new(Action::BootNotification, request)
    }

    pub fn heartbeat() -> Result<Self, OcppError> {
        Self::new(Action::Heartbeat, HeartbeatRequest {})
    }

    pub fn status_notification(
        connector_id: u32,
        status: ChargePointStatus,
    ) -> Result<Self, OcppError> {
        Self::new(
            Action::StatusNotification,
            StatusNotificationRequest {
                connector_id,
                error_code: ChargePointErrorCode::NoError,
                status,
                timestamp: chrono::Utc::now(),
            },
        )
    }

    pub fn meter_values(
        connector_id: u32,
        transaction_id: i32,
        meter_value: Vec<MeterValue>,
    ) -> Result<Self, OcppError> {
        Self::new(
            Action::MeterValues,
            MeterValuesRequest {
                connector_id,
                transaction_id: Some(transaction_id),
                meter_value,
            },
        )
    }

    pub fn authorize(id_tag: &str) -> Result<Self, OcppError> {
        Self::new(
            Action::Authorize,
            AuthorizeRequest {
                id_tag: id_tag.to_string(),
            },
        )
    }

    pub fn start_transaction(
        connector_id: u32,
        id_tag: &str,
        meter_start: u64,
    ) -> Result<Self, OcppError> {
        Self::new(
            Action::StartTransaction,
            StartTransactionRequest {
                connector_id,
                id_tag: id_tag.to_string(),
                meter_start,
                timestamp: chrono::Utc::now(),
            },
        )
    }

    pub fn stop_transaction(
        transaction_id: i32,
        id_tag: Option<String>,
        meter_stop: u64,
        reason: StopReason,
    ) -> Result<Self, OcppError> {
        Self::new(
            Action::StopTransaction,
            StopTransactionRequest {
                transaction_id,
                id_tag,
                meter_stop,
                timestamp: chrono::Utc::now(),
                reason,
            },
        )
    }

    /// Serialize to OCPP wire format: [2, messageId, action, payload]
    pub fn to_value(&self) -> Value {
        serde_json::json!([
            MessageType::Call as i32,
            &self.message_id,
            self.action.as_str(),
            &self.payload
        ])
    }
}

/// OCPP CALLRESULT message (success response)
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    pub message_id: String,
    pub payload: Value,
}

impl CallResult {
    pub fn new(message_id: String, payload: impl Serialize) -> Result<Self, OcppError> {
        Ok(Self {
            message_id,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Serialize to OCPP wire format: [3, messageId, payload]
    pub fn to_value(&self) -> Value {
        serde_json::json!([MessageType::CallResult as i32, &self.message_id, &self.payload])
    }

    /// Parse the payload as a specific response type
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, OcppError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// OCPP CALLERROR message (error response)
#[derive(Debug, Clone, PartialEq)]
pub struct CallError {
    pub message_id: String,
    pub error_code: ErrorCode,
    pub error_description: String,
    pub error_details: Value,
}

impl CallError {
    pub fn new(
        message_id: String,
        error_code: ErrorCode,
        error_description: impl Into<String>,
    ) -> Self {
        Self {
            message_id,
            error_code,
            error_description: error_description.into(),
            error_details: Value::Object(serde_json::Map::new()),
        }
    }

    /// Serialize to OCPP wire format: [4, messageId, errorCode, errorDescription, errorDetails]
    pub fn to_value(&self) -> Value {
        serde_json::json!([
            MessageType::CallError as i32,
            &self.message_id,
            self.error_code.to_string(),
            &self.error_description,
            &self.error_details
        ])
    }
}

/// Parsed OCPP message (any type)
#[derive(Debug, Clone, PartialEq)]
pub enum OcppMessage {
    Call(Call),
    CallResult(CallResult),
    CallError(CallError),
}

/// Outcome of decoding one inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(OcppMessage),
    Ignored(String),
}

impl OcppMessage {
    /// Parse an OCPP message from JSON text
    pub fn parse(text: &str) -> Result<Self, OcppError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    fn from_value(value: Value) -> Result<Self, OcppError> {
        let Value::Array(array) = value else {
            return Err(OcppError::InvalidFormat);
        };

        if array.len() < 3 {
            return Err(OcppError::InvalidFormat);
        }

        let msg_type = array[0].as_i64().ok_or(OcppError::InvalidFormat)?;
        let message_id = array[1]
            .as_str()
            .ok_or(OcppError::InvalidFormat)?
            .to_string();

        match msg_type {
            2 => {
                let action = array[2].as_str().ok_or(OcppError::InvalidFormat)?;
                let payload = array
                    .get(3)
                    .cloned()
                    .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

                Ok(OcppMessage::Call(Call {
                    message_id,
                    action: Action::from(action),
                    payload,
                }))
            }
            3 => Ok(OcppMessage::CallResult(CallResult {
                message_id,
                payload: array[2].clone(),
            })),
            4 => {
                let error_code = array[2]
                    .as_str()
                    .map(ErrorCode::from_wire)
                    .unwrap_or(ErrorCode::GenericError);
                let error_description = array
                    .get(3)
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                let error_details = array
                    .get(4)
                    .cloned()
                    .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

                Ok(OcppMessage::CallError(CallError {
                    message_id,
                    error_code,
                    error_description,
                    error_details,
                }))
            }
            other => Err(OcppError::UnknownMessageType(other)),
        }
    }

    /// Decode a frame, folding every parse failure into `Inbound::Ignored`
    pub fn decode(text: &str) -> Inbound {
        match Self::parse(text) {
            Ok(msg) => Inbound::Message(msg),
            Err(e) => Inbound::Ignored(e.to_string()),
        }
    }

    /// Get the message ID
    pub fn message_id(&self) -> &str {
        match self {
            OcppMessage::Call(c) => &c.message_id,
            OcppMessage::CallResult(r) => &r.message_id,
            OcppMessage::CallError(e) => &e.message_id,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            OcppMessage::Call(c) => c.to_value(),
            OcppMessage::CallResult(r) => r.to_value(),
            OcppMessage::CallError(e) => e.to_value(),
        }
    }

    /// Serialize to the text frame sent over the socket
    pub fn to_text(&self) -> String {
        self.to_value().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_serialization() {
        let call = Call::heartbeat().unwrap();
        let text = OcppMessage::Call(call).to_text();

        assert!(text.starts_with("[2,"));
        assert!(text.contains("\"Heartbeat\""));
    }

    #[test]
    fn test_request_survives_encode_decode() {
        let call = Call::authorize("abc123").unwrap();
        let text = OcppMessage::Call(call.clone()).to_text();

        match OcppMessage::decode(&text) {
            Inbound::Message(OcppMessage::Call(decoded)) => {
                assert_eq!(decoded.message_id, call.message_id);
                assert_eq!(decoded.action, Action::Authorize);
                assert_eq!(decoded.payload, call.payload);
            }
            other => panic!("Expected Call, got {:?}", other),
        }
    }

    #[test]
    fn test_call_without_payload_gets_empty_object() {
        let msg = OcppMessage::parse(r#"[2, "msg-1", "Reset"]"#).unwrap();
        match msg {
            OcppMessage::Call(call) => {
                assert_eq!(call.action, Action::Reset);
                assert!(call.payload.as_object().unwrap().is_empty());
            }
            _ => panic!("Expected Call"),
        }
    }

    #[test]
    fn test_unknown_action_is_preserved() {
        let msg = OcppMessage::parse(r#"[2, "msg-9", "UpdateFirmware", {}]"#).unwrap();
        match msg {
            OcppMessage::Call(call) => {
                assert_eq!(call.action, Action::Other("UpdateFirmware".into()));
                assert_eq!(call.action.to_string(), "UpdateFirmware");
            }
            _ => panic!("Expected Call"),
        }
    }

    #[test]
    fn test_call_result_parsing() {
        let json = r#"[3, "msg-123", {"currentTime": "2026-01-20T12:00:00Z"}]"#;
        match OcppMessage::parse(json).unwrap() {
            OcppMessage::CallResult(result) => {
                assert_eq!(result.message_id, "msg-123");
                let hb: HeartbeatResponse = result.parse_payload().unwrap();
                assert_eq!(hb.current_time.to_rfc3339(), "2026-01-20T12:00:00+00:00");
            }
            _ => panic!("Expected CallResult"),
        }
    }

    #[test]
    fn test_call_error_parsing() {
        let json = r#"[4, "msg-123", "NotImplemented", "Action not supported", {}]"#;
        match OcppMessage::parse(json).unwrap() {
            OcppMessage::CallError(error) => {
                assert_eq!(error.message_id, "msg-123");
                assert_eq!(error.error_code, ErrorCode::NotImplemented);
                assert_eq!(error.error_description, "Action not supported");
            }
            _ => panic!("Expected CallError"),
        }
    }

    #[test]
    fn test_unknown_error_code_degrades() {
        let json = r#"[4, "msg-7", "Teapot", "nope"]"#;
        match OcppMessage::parse(json).unwrap() {
            OcppMessage::CallError(error) => {
                assert_eq!(error.error_code, ErrorCode::GenericError);
                assert!(error.error_details.is_object());
            }
            _ => panic!("Expected CallError"),
        }
    }

    #[test]
    fn test_malformed_frames_are_ignored() {
        let frames = [
            "not json",
            "{}",
            "[]",
            r#"[2, "only-two"]"#,
            r#"[5, "id", {}]"#,
            r#"[1, "id", "Heartbeat", {}]"#,
            r#"["2", "id", "Heartbeat", {}]"#,
            r#"[3, 42, {}]"#,
        ];

        for frame in frames {
            assert!(
                matches!(OcppMessage::decode(frame), Inbound::Ignored(_)),
                "frame should be ignored: {}",
                frame
            );
        }
    }

    #[test]
    fn test_call_error_wire_shape() {
        let err = CallError::new("id-1".into(), ErrorCode::NotSupported, "Reset is disabled");
        let value = err.to_value();
        assert_eq!(value[0], 4);
        assert_eq!(value[1], "id-1");
        assert_eq!(value[2], "NotSupported");
        assert_eq!(value[3], "Reset is disabled");
        assert!(value[4].is_object());
    }

    #[test]
    fn test_message_ids_are_unique_v7() {
        let a = new_message_id();
        let b = new_message_id();
        assert_ne!(a, b);
        assert_eq!(Uuid::parse_str(&a).unwrap().get_version_num(), 7);
    }
}
