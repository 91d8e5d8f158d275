//! Engine error type

use serde_json::Value;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::ocpp::ErrorCode;

/// Errors raised by the OCPP engine
#[derive(Debug, Error)]
pub enum OcppError {
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid message format")]
    InvalidFormat,

    #[error("Unknown message type: {0}")]
    UnknownMessageType(i64),

    #[error("OCPP error from central system: {code} - {description}")]
    RemoteError {
        code: ErrorCode,
        description: String,
        details: Value,
    },

    #[error("Timeout waiting for response")]
    Timeout,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Not connected")]
    NotConnected,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Invalid central system URL: {0}")]
    InvalidUrl(String),

    #[error("Unknown connector status: {0}")]
    UnknownStatus(String),

    #[error("Authorization {0:?} for id tag")]
    NotAuthorized(crate::ocpp::AuthorizationStatus),

    #[error("Connector {0} already has an active transaction")]
    TransactionActive(u32),

    #[error("Transaction {0} is not active")]
    TransactionNotActive(i32),

    #[error("Gave up after {attempts} connection attempts")]
    RetriesExhausted { attempts: u32 },
}

impl OcppError {
    /// Transport failures end the session; everything else is recovered locally
    pub fn is_transport_fatal(&self) -> bool {
        matches!(
            self,
            OcppError::WebSocket(_) | OcppError::ConnectionClosed | OcppError::NotConnected
        )
    }
}
