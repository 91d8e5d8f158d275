//! Handlers for central-system initiated requests
//!
//! Each handler looks at the payload and the session state, decides the
//! immediate reply, and may hand back a follow-up sequence for the engine to
//! run in the background. Handlers never fail: malformed payloads and failed
//! preconditions turn into a `Rejected` status or a CALLERROR reply.
//!
//! | Action | Accepted when | Follow-up |
//! |--------|---------------|-----------|
//! | RemoteStartTransaction | non-empty `idTag`, connector free | authorize → start |
//! | RemoteStopTransaction | `transactionId` is the active one | stop |
//! | Reset | always | - |
//! | GetConfiguration | always (payload shape permitting) | - |
//! | ChangeConfiguration | `HeartbeatInterval` to 1..=86400 seconds | - |

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::ocpp::*;
use crate::state::{ChargePointState, StopClaim, KEY_HEARTBEAT_INTERVAL};

/// Connector used when RemoteStartTransaction omits one
pub const DEFAULT_CONNECTOR: u32 = 1;

/// Background work triggered by an accepted command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Followup {
    Start { id_tag: String, connector_id: u32 },
    Stop(StopClaim),
}

/// Reply to send plus optional follow-up
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub reply: OcppMessage,
    pub followup: Option<Followup>,
}

impl Dispatched {
    fn reply(reply: OcppMessage) -> Self {
        Self {
            reply,
            followup: None,
        }
    }
}

/// Route a CALL to its handler
pub fn dispatch(call: &Call, state: &mut ChargePointState) -> Dispatched {
    let id = call.message_id.clone();
    let payload = &call.payload;

    match &call.action {
        Action::RemoteStartTransaction => remote_start(id, payload, state),
        Action::RemoteStopTransaction => remote_stop(id, payload, state),
        Action::Reset => Dispatched::reply(reset(id, payload)),
        Action::GetConfiguration => Dispatched::reply(get_configuration(id, payload, state)),
        Action::ChangeConfiguration => Dispatched::reply(change_configuration(id, payload, state)),
        other => {
            warn!("Unsupported action {} ({})", other, id);
            Dispatched::reply(OcppMessage::CallError(CallError::new(
                id,
                ErrorCode::NotSupported,
                format!("Action {} is not supported", other),
            )))
        }
    }
}

fn result(message_id: String, payload: impl Serialize) -> OcppMessage {
    match CallResult::new(message_id.clone(), payload) {
        Ok(result) => OcppMessage::CallResult(result),
        Err(e) => OcppMessage::CallError(CallError::new(
            message_id,
            ErrorCode::InternalError,
            e.to_string(),
        )),
    }
}

fn status(message_id: String, status: GenericStatus) -> OcppMessage {
    result(message_id, StatusResponse { status })
}

fn remote_start(id: String, payload: &Value, state: &mut ChargePointState) -> Dispatched {
    let req: RemoteStartTransactionRequest = match serde_json::from_value(payload.clone()) {
        Ok(req) => req,
        Err(e) => {
            warn!("RemoteStartTransaction rejected, bad payload: {}", e);
            return Dispatched::reply(status(id, GenericStatus::Rejected));
        }
    };

    let Some(id_tag) = req.id_tag.filter(|tag| !tag.trim().is_empty()) else {
        warn!("RemoteStartTransaction rejected, no idTag");
        return Dispatched::reply(status(id, GenericStatus::Rejected));
    };

    let connector_id = req.connector_id.unwrap_or(DEFAULT_CONNECTOR);
    if let Err(e) = state.begin_start(connector_id) {
        warn!("RemoteStartTransaction rejected: {}", e);
        return Dispatched::reply(status(id, GenericStatus::Rejected));
    }

    info!(
        "RemoteStartTransaction accepted for {} on connector {}",
        id_tag, connector_id
    );
    Dispatched {
        reply: status(id, GenericStatus::Accepted),
        followup: Some(Followup::Start {
            id_tag,
            connector_id,
        }),
    }
}

fn remote_stop(id: String, payload: &Value, state: &mut ChargePointState) -> Dispatched {
    let req: RemoteStopTransactionRequest = match serde_json::from_value(payload.clone()) {
        Ok(req) => req,
        Err(e) => {
            warn!("RemoteStopTransaction rejected, bad payload: {}", e);
            return Dispatched::reply(status(id, GenericStatus::Rejected));
        }
    };

    match state.begin_stop(req.transaction_id) {
        Some(claim) => {
            info!("RemoteStopTransaction accepted for {}", req.transaction_id);
            Dispatched {
                reply: status(id, GenericStatus::Accepted),
                followup: Some(Followup::Stop(claim)),
            }
        }
        None => {
            warn!(
                "RemoteStopTransaction rejected, {} is not the active transaction (active: {:?})",
                req.transaction_id,
                state.transaction().map(|tx| tx.transaction_id)
            );
            Dispatched::reply(status(id, GenericStatus::Rejected))
        }
    }
}

fn reset(id: String, payload: &Value) -> OcppMessage {
    match serde_json::from_value::<ResetRequest>(payload.clone()) {
        Ok(req) => info!("Reset requested: {:?}", req.reset_type),
        Err(_) => info!("Reset requested: unspecified type"),
    }
    status(id, GenericStatus::Accepted)
}

fn get_configuration(id: String, payload: &Value, state: &ChargePointState) -> OcppMessage {
    let req: GetConfigurationRequest = match serde_json::from_value(payload.clone()) {
        Ok(req) => req,
        Err(e) => {
            warn!("GetConfiguration with bad payload: {}", e);
            return OcppMessage::CallError(CallError::new(
                id,
                ErrorCode::FormationViolation,
                e.to_string(),
            ));
        }
    };

    let known = state.configuration();
    let response = match req.key.filter(|keys| !keys.is_empty()) {
        None => GetConfigurationResponse {
            configuration_key: known,
            unknown_key: Vec::new(),
        },
        Some(keys) => {
            let mut response = GetConfigurationResponse::default();
            for key in keys {
                match known.iter().find(|kv| kv.key == key) {
                    Some(kv) => response.configuration_key.push(kv.clone()),
                    None => response.unknown_key.push(key),
                }
            }
            response
        }
    };

    result(id, response)
}

fn change_configuration(id: String, payload: &Value, state: &mut ChargePointState) -> OcppMessage {
    let verdict = match serde_json::from_value::<ChangeConfigurationRequest>(payload.clone()) {
        Ok(req) if req.key == KEY_HEARTBEAT_INTERVAL => match req.value.trim().parse::<u64>() {
            Ok(secs) if ChargePointState::is_valid_heartbeat_interval(secs) => {
                state.set_heartbeat_interval(secs);
                ConfigurationStatus::Accepted
            }
            _ => {
                warn!("ChangeConfiguration rejected, bad interval {:?}", req.value);
                ConfigurationStatus::Rejected
            }
        },
        Ok(req) => {
            warn!("ChangeConfiguration rejected for key {}", req.key);
            ConfigurationStatus::Rejected
        }
        Err(e) => {
            warn!("ChangeConfiguration rejected, bad payload: {}", e);
            ConfigurationStatus::Rejected
        }
    };

    result(id, StatusResponse { status: verdict })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use serde_json::json;
    use std::time::Duration;

    fn state() -> ChargePointState {
        ChargePointState::new(&EngineConfig::new("ws://localhost/ocpp", "CS001"))
    }

    fn call(action: &str, payload: Value) -> Call {
        Call {
            message_id: "srv-1".to_string(),
            action: Action::from(action),
            payload,
        }
    }

    fn reply_status(d: &Dispatched) -> Value {
        match &d.reply {
            OcppMessage::CallResult(r) => {
                assert_eq!(r.message_id, "srv-1");
                r.payload["status"].clone()
            }
            other => panic!("Expected CallResult, got {:?}", other),
        }
    }

    #[test]
    fn test_remote_start_with_token_is_accepted() {
        let mut state = state();
        let d = dispatch(
            &call("RemoteStartTransaction", json!({"idTag": "abc123", "connectorId": 1})),
            &mut state,
        );

        assert_eq!(reply_status(&d), "Accepted");
        assert_eq!(
            d.followup,
            Some(Followup::Start {
                id_tag: "abc123".into(),
                connector_id: 1
            })
        );
        assert!(!state.can_start(1));
    }

    #[test]
    fn test_remote_start_defaults_connector() {
        let mut state = state();
        let d = dispatch(&call("RemoteStartTransaction", json!({"idTag": "abc"})), &mut state);
        assert!(matches!(
            d.followup,
            Some(Followup::Start { connector_id: 1, .. })
        ));
    }

    #[test]
    fn test_remote_start_without_token_is_rejected() {
        let mut state = state();
        for payload in [json!({"connectorId": 1}), json!({"idTag": "  "}), json!([1, 2])] {
            let d = dispatch(&call("RemoteStartTransaction", payload), &mut state);
            assert_eq!(reply_status(&d), "Rejected");
            assert!(d.followup.is_none());
        }
        assert!(state.can_start(1));
    }

    #[test]
    fn test_remote_start_while_busy_is_rejected() {
        let mut state = state();
        state.begin_start(1).unwrap();
        state.record_start(1, 3, "T", 0);

        let d = dispatch(&call("RemoteStartTransaction", json!({"idTag": "x"})), &mut state);
        assert_eq!(reply_status(&d), "Rejected");
        assert!(d.followup.is_none());
    }

    #[test]
    fn test_remote_stop_matching_and_mismatched() {
        let mut state = state();
        state.begin_start(1).unwrap();
        state.record_start(1, 77, "T", 0);

        let d = dispatch(&call("RemoteStopTransaction", json!({"transactionId": 78})), &mut state);
        assert_eq!(reply_status(&d), "Rejected");
        assert!(d.followup.is_none());

        let d = dispatch(&call("RemoteStopTransaction", json!({"transactionId": 77})), &mut state);
        assert_eq!(reply_status(&d), "Accepted");
        assert!(matches!(d.followup, Some(Followup::Stop(ref c)) if c.transaction_id == 77));

        // Duplicate while the first stop is in flight
        let d = dispatch(&call("RemoteStopTransaction", json!({"transactionId": 77})), &mut state);
        assert_eq!(reply_status(&d), "Rejected");
    }

    #[test]
    fn test_remote_stop_without_transaction() {
        let mut state = state();
        let d = dispatch(&call("RemoteStopTransaction", json!({"transactionId": 1})), &mut state);
        assert_eq!(reply_status(&d), "Rejected");
    }

    #[test]
    fn test_reset_always_accepted() {
        let mut state = state();
        let d = dispatch(&call("Reset", json!({"type": "Hard"})), &mut state);
        assert_eq!(reply_status(&d), "Accepted");
        let d = dispatch(&call("Reset", json!({})), &mut state);
        assert_eq!(reply_status(&d), "Accepted");
    }

    #[test]
    fn test_get_configuration_all_and_filtered() {
        let mut state = state();
        let d = dispatch(&call("GetConfiguration", json!({})), &mut state);
        let OcppMessage::CallResult(all) = &d.reply else {
            panic!("Expected CallResult");
        };
        assert_eq!(all.payload["configurationKey"].as_array().unwrap().len(), 3);
        assert!(all.payload["unknownKey"].as_array().unwrap().is_empty());

        let d = dispatch(
            &call("GetConfiguration", json!({"key": ["HeartbeatInterval", "Bogus"]})),
            &mut state,
        );
        let OcppMessage::CallResult(some) = &d.reply else {
            panic!("Expected CallResult");
        };
        let response: GetConfigurationResponse = some.parse_payload().unwrap();
        assert_eq!(response.configuration_key.len(), 1);
        assert_eq!(response.configuration_key[0].key, "HeartbeatInterval");
        assert_eq!(response.unknown_key, vec!["Bogus".to_string()]);
    }

    #[test]
    fn test_get_configuration_bad_payload() {
        let mut state = state();
        let d = dispatch(&call("GetConfiguration", json!({"key": "HeartbeatInterval"})), &mut state);
        assert!(matches!(
            d.reply,
            OcppMessage::CallError(CallError {
                error_code: ErrorCode::FormationViolation,
                ..
            })
        ));
    }

    #[test]
    fn test_change_heartbeat_interval() {
        let mut state = state();
        let d = dispatch(
            &call("ChangeConfiguration", json!({"key": "HeartbeatInterval", "value": "15"})),
            &mut state,
        );
        assert_eq!(reply_status(&d), "Accepted");
        assert_eq!(state.heartbeat_interval(), Duration::from_secs(15));
    }

    #[test]
    fn test_change_configuration_rejections() {
        let mut state = state();
        let before = state.heartbeat_interval();
        let payloads = [
            json!({"key": "HeartbeatInterval", "value": "0"}),
            json!({"key": "HeartbeatInterval", "value": "-5"}),
            json!({"key": "HeartbeatInterval", "value": "soon"}),
            json!({"key": "HeartbeatInterval", "value": "86401"}),
            json!({"key": "HeartbeatInterval", "value": "18446744073709551615"}),
            json!({"key": "NumberOfConnectors", "value": "4"}),
            json!({"key": "HeartbeatInterval"}),
        ];

        for payload in payloads {
            let d = dispatch(&call("ChangeConfiguration", payload), &mut state);
            assert_eq!(reply_status(&d), "Rejected");
        }
        assert_eq!(state.heartbeat_interval(), before);
    }

    #[test]
    fn test_unknown_action_not_supported() {
        let mut state = state();
        let d = dispatch(&call("UnlockConnector", json!({"connectorId": 1})), &mut state);
        match d.reply {
            OcppMessage::CallError(e) => {
                assert_eq!(e.message_id, "srv-1");
                assert_eq!(e.error_code, ErrorCode::NotSupported);
            }
            other => panic!("Expected CallError, got {:?}", other),
        }
    }
}
